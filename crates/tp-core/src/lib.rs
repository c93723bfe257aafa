//! Core types and utilities for the tp-client proxy layer
//!
//! # Modules
//!
//! - `config`: Environment loading and client configuration
//! - `error`: Error types and Result alias
//! - `types`: Features, statuses and operation errors shared by every crate

pub mod config;
pub mod error;
pub mod types;

// Re-exports
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use types::*;
