//! AND-join over a fixed set of pending operations

use std::cell::Cell;
use std::ops::Deref;
use std::rc::Rc;
use tracing::debug;

use crate::operation::PendingOperation;

/// Finishes successfully once every inner operation succeeded, or with
/// the first inner error as soon as one arrives. Later inner outcomes
/// are ignored.
#[derive(Debug, Clone)]
pub struct PendingComposite {
    op: PendingOperation,
    total: usize,
}

impl PendingComposite {
    pub fn new<I>(operations: I) -> Self
    where
        I: IntoIterator<Item = PendingOperation>,
    {
        let operations: Vec<PendingOperation> = operations.into_iter().collect();
        let total = operations.len();
        let op = PendingOperation::new();

        if total == 0 {
            let _ = op.set_finished();
            return Self { op, total };
        }

        let succeeded = Rc::new(Cell::new(0usize));
        for inner in operations {
            let composite = op.clone();
            let succeeded = Rc::clone(&succeeded);
            inner.on_finished(move |inner| {
                if composite.is_finished() {
                    return;
                }
                match inner.error() {
                    Some(err) => {
                        debug!(error = %err, "Composite operation failed on inner operation");
                        let _ = composite.set_finished_with_error(err);
                    }
                    None => {
                        succeeded.set(succeeded.get() + 1);
                        if succeeded.get() == total {
                            let _ = composite.set_finished();
                        }
                    }
                }
            });
        }

        Self { op, total }
    }

    /// Number of joined operations
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn operation(&self) -> &PendingOperation {
        &self.op
    }
}

impl Deref for PendingComposite {
    type Target = PendingOperation;

    fn deref(&self) -> &PendingOperation {
        &self.op
    }
}

impl From<PendingComposite> for PendingOperation {
    fn from(composite: PendingComposite) -> Self {
        composite.op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_core::{ErrorKind, OperationError};

    #[test]
    fn test_empty_composite_finishes_immediately() {
        let composite = PendingComposite::new(Vec::new());
        assert!(composite.is_empty());
        assert!(composite.is_finished());
        assert!(composite.is_valid());
    }

    #[test]
    fn test_succeeds_after_all_inner_operations() {
        let ops: Vec<_> = (0..3).map(|_| PendingOperation::new()).collect();
        let composite = PendingComposite::new(ops.clone());

        ops[2].set_finished().unwrap();
        ops[0].set_finished().unwrap();
        assert!(!composite.is_finished());

        ops[1].set_finished().unwrap();
        assert!(composite.is_valid());
    }

    #[test]
    fn test_first_error_wins_and_later_outcomes_are_ignored() {
        let ops: Vec<_> = (0..3).map(|_| PendingOperation::new()).collect();
        let composite = PendingComposite::new(ops.clone());

        ops[1]
            .set_finished_with_error(OperationError::not_implemented("second failed"))
            .unwrap();
        assert!(composite.is_error());
        assert_eq!(composite.error_kind(), Some(ErrorKind::NotImplemented));

        ops[0].set_finished().unwrap();
        ops[2]
            .set_finished_with_error(OperationError::cancelled("third failed"))
            .unwrap();
        assert_eq!(composite.error_message().as_deref(), Some("second failed"));
        assert!(ops[0].is_valid());
    }

    #[test]
    fn test_already_finished_inner_operations() {
        let composite = PendingComposite::new(vec![
            PendingOperation::finished(),
            PendingOperation::finished(),
        ]);
        assert_eq!(composite.len(), 2);
        assert!(composite.is_valid());

        let failing = PendingComposite::new(vec![
            PendingOperation::finished(),
            PendingOperation::failed(OperationError::not_available("nope")),
        ]);
        assert_eq!(failing.error_kind(), Some(ErrorKind::NotAvailable));
    }
}
