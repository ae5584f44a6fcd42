//! The storage operation queue.
//!
//! Commits, pulls and resets within one replica are serialized through
//! this queue: enqueue order equals visible execution order. Requests
//! are fire-and-queue; the queue drains cooperatively, and a failed
//! operation is logged while the drain proceeds with the next one.

use crate::error::SyncResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

type QueuedOp = Box<dyn FnOnce() -> SyncResult<()> + Send>;

/// A FIFO queue of storage operations.
#[derive(Default)]
pub struct OpQueue {
    ops: Mutex<VecDeque<(&'static str, QueuedOp)>>,
    draining: AtomicBool,
}

impl OpQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation. New enqueues are admitted at any time,
    /// including from within a draining operation.
    pub fn enqueue(&self, label: &'static str, op: impl FnOnce() -> SyncResult<()> + Send + 'static) {
        self.ops.lock().push_back((label, Box::new(op)));
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Runs queued operations until the queue is empty.
    ///
    /// Returns the number of operations run. A drain started from
    /// within a running operation returns immediately; the outer drain
    /// picks up whatever was enqueued.
    pub fn drain(&self) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return 0;
        }

        let mut ran = 0;
        loop {
            let next = self.ops.lock().pop_front();
            let Some((label, op)) = next else {
                break;
            };
            ran += 1;
            match op() {
                Ok(()) => debug!(label, "storage operation completed"),
                Err(e) => warn!(label, error = %e, "storage operation failed; continuing drain"),
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc;

    #[test]
    fn runs_in_enqueue_order() {
        let queue = OpQueue::new();
        let seen = Arc::new(PMutex::new(Vec::new()));

        for n in 0..3 {
            let sink = Arc::clone(&seen);
            queue.enqueue("op", move || {
                sink.lock().push(n);
                Ok(())
            });
        }

        assert_eq!(queue.drain(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn failures_do_not_stop_the_drain() {
        let queue = OpQueue::new();
        let seen = Arc::new(PMutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        queue.enqueue("fail", move || {
            sink.lock().push("fail");
            Err(crate::error::SyncError::ProjectNotLoaded {
                project_id: "p1".into(),
            })
        });
        let sink = Arc::clone(&seen);
        queue.enqueue("ok", move || {
            sink.lock().push("ok");
            Ok(())
        });

        assert_eq!(queue.drain(), 2);
        assert_eq!(*seen.lock(), vec!["fail", "ok"]);
    }

    #[test]
    fn operations_enqueued_mid_drain_run_in_the_same_drain() {
        let queue = Arc::new(OpQueue::new());
        let seen = Arc::new(PMutex::new(Vec::new()));

        let inner_queue = Arc::clone(&queue);
        let sink = Arc::clone(&seen);
        queue.enqueue("outer", move || {
            sink.lock().push("outer");
            let sink2 = Arc::clone(&sink);
            inner_queue.enqueue("inner", move || {
                sink2.lock().push("inner");
                Ok(())
            });
            Ok(())
        });

        assert_eq!(queue.drain(), 2);
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }
}
