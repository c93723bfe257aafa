//! Common types used across tp-client

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Bus type for DBus connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    System,
    #[default]
    Session,
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusType::System => write!(f, "system"),
            BusType::Session => write!(f, "session"),
        }
    }
}

impl std::str::FromStr for BusType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(BusType::System),
            "session" => Ok(BusType::Session),
            other => Err(crate::Error::invalid_argument(format!(
                "unknown bus type '{}'",
                other
            ))),
        }
    }
}

/// An independently requestable capability of a proxy object.
///
/// Identity is the `(namespace, code)` pair. The core flag is carried
/// along but does not take part in equality, hashing or ordering, so a
/// feature looked up without the flag still matches its registration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Feature {
    namespace: &'static str,
    code: u32,
    core: bool,
}

impl Feature {
    pub const fn new(namespace: &'static str, code: u32) -> Self {
        Self {
            namespace,
            code,
            core: false,
        }
    }

    /// A feature implicitly added to every readiness request of its object
    pub const fn core(namespace: &'static str, code: u32) -> Self {
        Self {
            namespace,
            code,
            core: true,
        }
    }

    pub const fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub const fn code(&self) -> u32 {
        self.code
    }

    pub const fn is_core(&self) -> bool {
        self.core
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.code == other.code
    }
}

impl Eq for Feature {}

impl Hash for Feature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.code.hash(state);
    }
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Feature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.namespace
            .cmp(other.namespace)
            .then(self.code.cmp(&other.code))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.code)
    }
}

/// Ordered feature set, iterated in a stable order
pub type Features = BTreeSet<Feature>;

/// Build a feature set from a slice
pub fn features(list: &[Feature]) -> Features {
    list.iter().copied().collect()
}

/// Coarse lifecycle stage of the object owning a readiness helper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Status(pub u32);

impl Status {
    /// Moving to this status fails every outstanding and future request
    pub const INVALIDATED: Status = Status(u32::MAX);

    pub fn is_invalidated(self) -> bool {
        self == Self::INVALIDATED
    }
}

impl Default for Status {
    fn default() -> Self {
        Status(0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalidated() {
            write!(f, "invalidated")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Error kinds surfaced by pending operations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A required remote interface is missing
    NotImplemented,
    /// The feature or method cannot be used in the current state
    NotAvailable,
    /// Malformed request, e.g. an unregistered feature
    InvalidArgument,
    /// The underlying entity went away before the work completed
    Cancelled,
    /// Error name reported by the remote side, passed through as is
    Remote(String),
}

impl ErrorKind {
    pub const NOT_IMPLEMENTED: &'static str = "org.freedesktop.Telepathy.Error.NotImplemented";
    pub const NOT_AVAILABLE: &'static str = "org.freedesktop.Telepathy.Error.NotAvailable";
    pub const INVALID_ARGUMENT: &'static str = "org.freedesktop.Telepathy.Error.InvalidArgument";
    pub const CANCELLED: &'static str = "org.freedesktop.Telepathy.Error.Cancelled";
    pub const DBUS_FAILED: &'static str = "org.freedesktop.DBus.Error.Failed";
    pub const DBUS_NO_REPLY: &'static str = "org.freedesktop.DBus.Error.NoReply";

    /// D-Bus error name for this kind
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::NotImplemented => Self::NOT_IMPLEMENTED,
            ErrorKind::NotAvailable => Self::NOT_AVAILABLE,
            ErrorKind::InvalidArgument => Self::INVALID_ARGUMENT,
            ErrorKind::Cancelled => Self::CANCELLED,
            ErrorKind::Remote(name) => name,
        }
    }

    /// Map a D-Bus error name back to a kind
    pub fn from_name(name: &str) -> Self {
        match name {
            Self::NOT_IMPLEMENTED => ErrorKind::NotImplemented,
            Self::NOT_AVAILABLE => ErrorKind::NotAvailable,
            Self::INVALID_ARGUMENT => ErrorKind::InvalidArgument,
            Self::CANCELLED => ErrorKind::Cancelled,
            other => ErrorKind::Remote(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal failure of a pending operation: an error kind plus a
/// human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAvailable, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Error name on the wire
    pub fn name(&self) -> &str {
        self.kind.name()
    }
}
