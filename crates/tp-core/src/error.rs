//! Error types for tp-client

use thiserror::Error;

use crate::types::{ErrorKind, OperationError};

/// Main error type for tp-client operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// A caller broke a usage contract (double finish, late registration, ...)
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a contract violation error
    pub fn contract(msg: impl Into<String>) -> Self {
        Error::Contract(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether this error reports a misuse of an API rather than a runtime failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_))
    }
}

impl From<zbus::Error> for OperationError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, message, _) => OperationError::new(
                ErrorKind::from_name(name.as_str()),
                message.unwrap_or_default(),
            ),
            other => OperationError::new(
                ErrorKind::Remote(ErrorKind::DBUS_FAILED.to_string()),
                other.to_string(),
            ),
        }
    }
}

impl From<Error> for OperationError {
    fn from(err: Error) -> Self {
        match err {
            Error::Operation(op) => op,
            Error::Dbus(e) => e.into(),
            Error::InvalidArgument(msg) => OperationError::new(ErrorKind::InvalidArgument, msg),
            other => OperationError::new(
                ErrorKind::Remote(ErrorKind::DBUS_FAILED.to_string()),
                other.to_string(),
            ),
        }
    }
}
