//! Single-shot asynchronous results
//!
//! A [`PendingOperation`] starts pending and transitions exactly once to
//! success or to an [`OperationError`]. Observers registered with
//! [`PendingOperation::on_finished`] are notified exactly once, including
//! observers that attach after the transition. The operation can also be
//! awaited.

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, warn};

use tp_core::{Error, ErrorKind, OperationError, Result};

/// Outcome carried by a finished operation
pub type Outcome = std::result::Result<(), OperationError>;

type Observer = Box<dyn FnOnce(&PendingOperation)>;

#[derive(Default)]
struct OperationState {
    outcome: Option<Outcome>,
    observers: Vec<Observer>,
    wakers: Vec<Waker>,
}

/// Handle to a single asynchronous action.
///
/// Cloning yields another handle to the same operation.
#[derive(Clone, Default)]
pub struct PendingOperation {
    state: Rc<RefCell<OperationState>>,
}

impl PendingOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// An operation that already finished successfully
    pub fn finished() -> Self {
        let op = Self::new();
        op.state.borrow_mut().outcome = Some(Ok(()));
        op
    }

    /// An operation that already failed
    pub fn failed(error: OperationError) -> Self {
        let op = Self::new();
        op.state.borrow_mut().outcome = Some(Err(error));
        op
    }

    /// A new operation mirroring the outcome of `inner`.
    ///
    /// Used to hand out an operation owned by the caller while the real
    /// work is tracked elsewhere, e.g. cancelling a channel request.
    pub fn chained(inner: &PendingOperation) -> Self {
        let op = Self::new();
        let forward = op.clone();
        inner.on_finished(move |inner| {
            if let Some(outcome) = inner.outcome() {
                let _ = forward.finish(outcome);
            }
        });
        op
    }

    /// Transition to success
    pub fn set_finished(&self) -> Result<()> {
        self.finish(Ok(()))
    }

    /// Transition to failure
    pub fn set_finished_with_error(&self, error: OperationError) -> Result<()> {
        self.finish(Err(error))
    }

    /// Transition to the given outcome.
    ///
    /// Finishing an already finished operation is a contract violation;
    /// the first outcome is kept.
    pub fn finish(&self, outcome: Outcome) -> Result<()> {
        let (observers, wakers) = {
            let mut state = self.state.borrow_mut();
            if let Some(previous) = &state.outcome {
                warn!(
                    previous = ?previous,
                    rejected = ?outcome,
                    "PendingOperation finished twice"
                );
                return Err(Error::contract("pending operation already finished"));
            }
            if let Err(err) = &outcome {
                debug!(error = %err, "PendingOperation finished with error");
            }
            state.outcome = Some(outcome);
            (
                std::mem::take(&mut state.observers),
                std::mem::take(&mut state.wakers),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        for observer in observers {
            observer(self);
        }
        Ok(())
    }

    /// Register a completion observer.
    ///
    /// Runs immediately when the operation has already finished.
    pub fn on_finished<F>(&self, observer: F)
    where
        F: FnOnce(&PendingOperation) + 'static,
    {
        if self.is_finished() {
            observer(self);
            return;
        }
        self.state.borrow_mut().observers.push(Box::new(observer));
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().outcome.is_some()
    }

    /// Finished successfully
    pub fn is_valid(&self) -> bool {
        matches!(self.state.borrow().outcome, Some(Ok(())))
    }

    /// Finished with an error
    pub fn is_error(&self) -> bool {
        matches!(self.state.borrow().outcome, Some(Err(_)))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.state.borrow().outcome.clone()
    }

    /// The error, once finished with an error
    pub fn error(&self) -> Option<OperationError> {
        match &self.state.borrow().outcome {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|err| err.kind)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error().map(|err| err.message)
    }

    /// Future resolving once the operation finishes
    pub fn wait(&self) -> Finished {
        Finished { op: self.clone() }
    }

    /// Whether both handles refer to the same operation
    pub fn ptr_eq(&self, other: &PendingOperation) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PendingOperation")
            .field("outcome", &state.outcome)
            .field("observers", &state.observers.len())
            .finish()
    }
}

/// Future returned by [`PendingOperation::wait`]
#[derive(Debug)]
pub struct Finished {
    op: PendingOperation,
}

impl Future for Finished {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.op.state.borrow_mut();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl IntoFuture for PendingOperation {
    type Output = Outcome;
    type IntoFuture = Finished;

    fn into_future(self) -> Self::IntoFuture {
        Finished { op: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_finish_success_notifies_once() {
        let op = PendingOperation::new();
        let calls = Rc::new(Cell::new(0));

        let seen = calls.clone();
        op.on_finished(move |op| {
            assert!(op.is_valid());
            seen.set(seen.get() + 1);
        });

        assert!(!op.is_finished());
        op.set_finished().unwrap();
        assert!(op.is_finished());
        assert!(!op.is_error());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_finish_error_records_kind_and_message() {
        let op = PendingOperation::new();
        op.set_finished_with_error(OperationError::not_available("offline"))
            .unwrap();

        assert!(op.is_error());
        assert_eq!(op.error_kind(), Some(ErrorKind::NotAvailable));
        assert_eq!(op.error_message().as_deref(), Some("offline"));
    }

    #[test]
    fn test_double_finish_is_rejected_and_keeps_first_outcome() {
        let op = PendingOperation::new();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        op.on_finished(move |_| seen.set(seen.get() + 1));

        op.set_finished_with_error(OperationError::cancelled("first"))
            .unwrap();
        let err = op.set_finished().unwrap_err();

        assert!(err.is_contract_violation());
        assert_eq!(op.error_message().as_deref(), Some("first"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_late_observer_runs_immediately() {
        let op = PendingOperation::finished();
        let called = Rc::new(Cell::new(false));
        let seen = called.clone();
        op.on_finished(move |_| seen.set(true));
        assert!(called.get());
    }

    #[test]
    fn test_chained_forwards_error() {
        let inner = PendingOperation::new();
        let outer = PendingOperation::chained(&inner);
        assert!(!outer.is_finished());

        inner
            .set_finished_with_error(OperationError::new(
                ErrorKind::Remote("org.example.Error.Busy".into()),
                "busy",
            ))
            .unwrap();

        assert!(!outer.ptr_eq(&inner));
        assert_eq!(
            outer.error_kind(),
            Some(ErrorKind::Remote("org.example.Error.Busy".into()))
        );
    }

    #[tokio::test]
    async fn test_await_resolves_on_finish() {
        let op = PendingOperation::new();
        let finisher = op.clone();

        let waiter = op.wait();
        finisher.set_finished().unwrap();
        assert_eq!(waiter.await, Ok(()));
        assert_eq!(op.await, Ok(()));
    }

    #[tokio::test]
    async fn test_await_pending_then_finished_from_local_task() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let op = PendingOperation::new();
                let finisher = op.clone();
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    finisher
                        .set_finished_with_error(OperationError::cancelled("closed"))
                        .unwrap();
                });
                let outcome = op.await;
                assert_eq!(outcome.unwrap_err().kind, ErrorKind::Cancelled);
            })
            .await;
    }
}
