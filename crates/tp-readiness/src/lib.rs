//! Pending operations and feature readiness for tp-client proxies
//!
//! # Modules
//!
//! - `operation`: Single-shot asynchronous results
//! - `composite`: AND-join over several operations
//! - `void`: Adapter for remote calls without a useful reply
//! - `introspectable`: Per-feature introspection descriptors
//! - `helper`: The readiness engine
//! - `ready_object`: Readiness surface of proxy objects
//!
//! Everything here is single-threaded. Asynchronous work is driven with
//! `tokio::task::spawn_local`, so callers run inside a `LocalSet`.

pub mod composite;
pub mod helper;
pub mod introspectable;
pub mod operation;
pub mod ready_object;
pub mod void;

// Re-exports
pub use composite::PendingComposite;
pub use helper::{ReadinessHelper, WeakReadinessHelper};
pub use introspectable::{IntrospectFn, Introspectable, Introspectables};
pub use operation::{Finished, Outcome, PendingOperation};
pub use ready_object::ReadyObject;
pub use void::PendingVoid;
