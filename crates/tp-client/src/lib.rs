//! Readiness-driven proxies for Telepathy objects
//!
//! # Modules
//!
//! - `interfaces`: D-Bus interface and property names
//! - `transport`: Remote call boundary and its zbus implementation
//! - `memory`: In-memory transport serving canned replies
//! - `contact` / `contact_manager`: Contacts and their per-connection arena
//! - `media_stream` / `media_content` / `media_channel`: Media channel proxies
//! - `channel_request`: Pending channel requests
//! - `channel_class`: Channel class filters
//!
//! Proxies are single-threaded (`Rc`-based) and run their remote calls
//! with `tokio::task::spawn_local`.

pub mod channel_class;
pub mod channel_request;
pub mod contact;
pub mod contact_manager;
pub mod interfaces;
pub mod media_channel;
pub mod media_content;
pub mod media_stream;
pub mod memory;
pub mod transport;

// Re-exports
pub use channel_class::ChannelClassSpec;
pub use channel_request::ChannelRequest;
pub use contact::{Contact, Presence};
pub use contact_manager::{ContactId, ContactManager, PendingContacts};
pub use media_channel::{ChannelSummary, MediaChannel};
pub use media_content::{ContentBackend, MediaContent};
pub use media_stream::{MediaStream, SendingState, StreamBackend};
pub use memory::MemoryTransport;
pub use transport::{DbusTransport, MethodArgs, PropertyMap, StreamInfo, Transport};

pub use tp_readiness::{PendingOperation, ReadyObject};
