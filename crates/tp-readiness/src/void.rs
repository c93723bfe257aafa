//! Adapter turning a no-payload remote call into a [`PendingOperation`]

use std::future::Future;
use std::ops::Deref;
use tracing::debug;

use tp_core::OperationError;

use crate::operation::PendingOperation;

/// Pending result of a remote call whose reply carries nothing useful.
///
/// The call is driven on the current thread's `LocalSet`, so it must be
/// created from within one.
#[derive(Debug, Clone)]
pub struct PendingVoid {
    op: PendingOperation,
}

impl PendingVoid {
    /// Track an already dispatched call
    pub fn new<F>(call: F) -> Self
    where
        F: Future<Output = Result<(), OperationError>> + 'static,
    {
        let op = PendingOperation::new();
        let handle = op.clone();
        tokio::task::spawn_local(async move {
            let outcome = call.await;
            if let Err(err) = &outcome {
                debug!(error = %err, "Remote call failed");
            }
            let _ = handle.finish(outcome);
        });
        Self { op }
    }

    /// Track a call whose dispatch itself may fail synchronously, e.g.
    /// because its arguments cannot be marshalled.
    pub fn dispatch<F>(dispatch: Result<F, OperationError>) -> Self
    where
        F: Future<Output = Result<(), OperationError>> + 'static,
    {
        match dispatch {
            Ok(call) => Self::new(call),
            Err(err) => Self::failed(err),
        }
    }

    /// A call that never made it onto the wire
    pub fn failed(error: OperationError) -> Self {
        Self {
            op: PendingOperation::failed(error),
        }
    }

    pub fn operation(&self) -> &PendingOperation {
        &self.op
    }
}

impl Deref for PendingVoid {
    type Target = PendingOperation;

    fn deref(&self) -> &PendingOperation {
        &self.op
    }
}

impl From<PendingVoid> for PendingOperation {
    fn from(pending: PendingVoid) -> Self {
        pending.op
    }
}
