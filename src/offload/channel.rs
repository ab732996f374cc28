//! Result Channel: exactly-once delivery of an offloaded result.
//!
//! ## Responsibility
//! Carry one result from the worker that produced it to the one task
//! awaiting it, and let that task withdraw the request while it is still
//! queued.
//!
//! ## Guarantees
//! - A [`CompletionSlot`] is consumed by writing it, so a result is written
//!   at most once; a slot dropped unwritten is observed as a worker fault
//! - Awaiting a [`PendingResult`] suspends the task, never the thread
//! - Pre-claim withdrawal and worker claim are serialised by the queue lock:
//!   exactly one of them wins
//!
//! ## NOT Responsible For
//! - Queue storage or worker threads (that belongs to `offload`)

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::primitives::Output;
use crate::DispatchError;

/// What a worker writes into a completion slot.
pub(crate) type JobResult = Result<Output, DispatchError>;

/// Queue-side hook a pending handle uses to withdraw its request.
pub(crate) trait Dequeue: Send + Sync {
    /// Remove request `id` if no worker has claimed it yet.
    fn remove(&self, id: u64) -> bool;
}

/// Outcome of [`PendingResult::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The request was still queued and has been removed without running.
    Dequeued,
    /// A worker already holds the request. It runs to completion and the
    /// result is discarded.
    AlreadyClaimed,
}

/// Write end of the channel. Travels with the queued request.
#[derive(Debug)]
pub(crate) struct CompletionSlot {
    tx: oneshot::Sender<JobResult>,
}

impl CompletionSlot {
    /// Deliver the result. Returns `false` if the receiver is gone.
    pub(crate) fn fulfil(self, result: JobResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Create a connected slot and handle for request `id`.
pub(crate) fn channel(id: u64, queue: Weak<dyn Dequeue>) -> (CompletionSlot, PendingResult) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSlot { tx },
        PendingResult {
            id,
            rx,
            queue,
            settled: false,
        },
    )
}

/// Handle to an offloaded request.
///
/// Await it to get the result. Dropping it before the result arrives
/// withdraws the request if it is still queued, like [`cancel`](Self::cancel).
///
/// # Panics
///
/// This type never panics.
pub struct PendingResult {
    id: u64,
    rx: oneshot::Receiver<JobResult>,
    queue: Weak<dyn Dequeue>,
    settled: bool,
}

impl PendingResult {
    /// Executor-assigned request id, unique per executor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraw interest in the result.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn cancel(mut self) -> Cancellation {
        self.settled = true;
        match self.queue.upgrade() {
            Some(queue) if queue.remove(self.id) => Cancellation::Dequeued,
            _ => Cancellation::AlreadyClaimed,
        }
    }

    /// Block the current OS thread until the result arrives.
    ///
    /// For callers outside the Tokio runtime. Never call this from a runtime
    /// worker thread.
    pub fn wait(self) -> Result<Output, DispatchError> {
        futures::executor::block_on(self)
    }
}

impl Future for PendingResult {
    type Output = Result<Output, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(received) => {
                self.settled = true;
                Poll::Ready(received.unwrap_or_else(|_| {
                    Err(DispatchError::WorkerFault(
                        "offload worker lost the request before writing a result".into(),
                    ))
                }))
            }
        }
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(self.id);
        }
    }
}

impl std::fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeQueue {
        queued: Mutex<Vec<u64>>,
        removals: Mutex<Vec<u64>>,
    }

    impl Dequeue for FakeQueue {
        fn remove(&self, id: u64) -> bool {
            self.removals.lock().push(id);
            let mut queued = self.queued.lock();
            match queued.iter().position(|q| *q == id) {
                Some(pos) => {
                    queued.remove(pos);
                    true
                }
                None => false,
            }
        }
    }

    fn fake(ids: &[u64]) -> Arc<FakeQueue> {
        let queue = Arc::new(FakeQueue::default());
        queue.queued.lock().extend_from_slice(ids);
        queue
    }

    fn weak(queue: &Arc<FakeQueue>) -> Weak<dyn Dequeue> {
        let as_dyn: Arc<dyn Dequeue> = Arc::clone(queue) as Arc<dyn Dequeue>;
        Arc::downgrade(&as_dyn)
    }

    #[tokio::test]
    async fn test_fulfilled_slot_resolves_pending() {
        let queue = fake(&[1]);
        let (slot, pending) = channel(1, weak(&queue));
        assert!(slot.fulfil(Ok(Output::Verdict(true))));
        let out = pending.await.expect("test: result delivered");
        assert_eq!(out, Output::Verdict(true));
    }

    #[tokio::test]
    async fn test_dropped_slot_is_worker_fault() {
        let queue = fake(&[]);
        let (slot, pending) = channel(1, weak(&queue));
        drop(slot);
        let err = pending.await.expect_err("test: lost slot");
        assert!(matches!(err, DispatchError::WorkerFault(_)));
    }

    #[test]
    fn test_cancel_queued_request_is_dequeued() {
        let queue = fake(&[7]);
        let (_slot, pending) = channel(7, weak(&queue));
        assert_eq!(pending.cancel(), Cancellation::Dequeued);
        assert!(queue.queued.lock().is_empty());
    }

    #[test]
    fn test_cancel_claimed_request_is_noop() {
        let queue = fake(&[]);
        let (_slot, pending) = channel(7, weak(&queue));
        assert_eq!(pending.cancel(), Cancellation::AlreadyClaimed);
        // cancel() must not trigger a second removal from Drop
        assert_eq!(queue.removals.lock().len(), 1);
    }

    #[test]
    fn test_drop_unresolved_withdraws_request() {
        let queue = fake(&[3, 4]);
        let (_slot, pending) = channel(3, weak(&queue));
        drop(pending);
        assert_eq!(*queue.queued.lock(), vec![4]);
    }

    #[tokio::test]
    async fn test_drop_after_result_does_not_touch_queue() {
        let queue = fake(&[]);
        let (slot, pending) = channel(9, weak(&queue));
        slot.fulfil(Ok(Output::Verdict(false)));
        let _ = pending.await;
        assert!(queue.removals.lock().is_empty());
    }

    #[test]
    fn test_fulfil_after_receiver_dropped_reports_false() {
        let queue = fake(&[]);
        let (slot, pending) = channel(2, weak(&queue));
        drop(pending);
        assert!(!slot.fulfil(Ok(Output::Verdict(true))));
    }

    #[test]
    fn test_wait_blocks_until_result() {
        let queue = fake(&[]);
        let (slot, pending) = channel(5, weak(&queue));
        let writer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            slot.fulfil(Ok(Output::Bytes(vec![1, 2, 3])))
        });
        let out = pending.wait().expect("test: result");
        assert_eq!(out.as_bytes(), Some(&[1u8, 2, 3][..]));
        assert!(writer.join().expect("test: writer thread"));
    }

    #[test]
    fn test_dead_queue_cancel_is_already_claimed() {
        let queue = fake(&[1]);
        let (_slot, pending) = channel(1, weak(&queue));
        drop(queue);
        assert_eq!(pending.cancel(), Cancellation::AlreadyClaimed);
    }
}
