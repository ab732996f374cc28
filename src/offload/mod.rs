//! # Offload Executor
//!
//! ## Responsibility
//! Run expensive primitive calls to completion on a fixed pool of dedicated
//! OS threads, outside the Tokio runtime, and hand each result back through
//! a [`PendingResult`].
//!
//! ## Guarantees
//! - FIFO: workers claim requests strictly in submission order
//! - Bounded: at most `queue_depth_limit` requests wait unclaimed; async
//!   submitters suspend cooperatively while the queue is full
//! - No loss: every accepted request ends in exactly one result or one
//!   pre-claim cancellation
//! - Fault isolation: a panicking primitive fails only its own request; the
//!   faulted worker retires and a replacement thread restores capacity
//! - Drain on shutdown: requests queued before `shutdown` still run
//!
//! ## NOT Responsible For
//! - Deciding what to offload (that belongs to `policy`)
//! - Argument validation (requests arrive already validated)

pub mod channel;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use channel::{Cancellation, PendingResult};
use channel::{CompletionSlot, Dequeue};

use crate::config::OffloadConfig;
use crate::metrics;
use crate::primitives::{panic_message, PrimitiveBackend};
use crate::registry::Primitive;
use crate::DispatchError;

/// One queued request.
struct Job {
    id: u64,
    primitive: Primitive,
    inputs: Vec<Vec<u8>>,
    slot: CompletionSlot,
    /// Queue slot; released the moment a worker claims the job.
    permit: OwnedSemaphorePermit,
}

struct Queue {
    jobs: VecDeque<Job>,
    open: bool,
}

/// Point-in-time counters of an [`OffloadExecutor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffloadStats {
    /// Worker threads currently alive.
    pub workers: usize,
    /// Requests waiting for a worker.
    pub queued: usize,
    /// Requests that produced a result (success or error).
    pub completed: u64,
    /// Requests withdrawn before a worker claimed them.
    pub cancelled: u64,
    /// Requests whose primitive panicked.
    pub faults: u64,
    /// Replacement workers started after faults.
    pub respawned: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    permits: Arc<Semaphore>,
    backend: Arc<dyn PrimitiveBackend>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_name: String,
    stack_size: usize,
    next_id: AtomicU64,
    next_thread: AtomicUsize,
    live_workers: AtomicUsize,
    completed: AtomicU64,
    cancelled: AtomicU64,
    faults: AtomicU64,
    respawned: AtomicU64,
}

impl Dequeue for Shared {
    fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut queue = self.queue.lock();
            let position = queue.jobs.iter().position(|job| job.id == id);
            let removed = position.and_then(|pos| queue.jobs.remove(pos));
            metrics::set_offload_queue_depth(queue.jobs.len());
            removed
        };
        match removed {
            Some(job) => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id, primitive = %job.primitive, "offload request withdrawn before claim");
                // Dropping the job releases its queue permit.
                true
            }
            None => false,
        }
    }
}

impl Shared {
    fn close(&self) -> bool {
        let was_open = {
            let mut queue = self.queue.lock();
            std::mem::replace(&mut queue.open, false)
        };
        self.permits.close();
        self.available.notify_all();
        was_open
    }

    /// Block until a job is available. `None` once closed and drained.
    fn claim(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                metrics::set_offload_queue_depth(queue.jobs.len());
                return Some(job);
            }
            if !queue.open {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }
}

/// Replaces its worker if the worker exits by fault rather than by drain.
struct Sentinel {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.shared.live_workers.fetch_sub(1, Ordering::AcqRel);
        if !self.armed {
            return;
        }
        self.shared.respawned.fetch_add(1, Ordering::Relaxed);
        metrics::inc_worker_respawn();
        if let Err(e) = spawn_worker(&self.shared) {
            tracing::error!(error = %e, "failed to replace offload worker; pool capacity reduced");
        }
    }
}

fn spawn_worker(shared: &Arc<Shared>) -> std::io::Result<()> {
    let index = shared.next_thread.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", shared.thread_name, index);
    shared.live_workers.fetch_add(1, Ordering::AcqRel);
    let worker_shared = Arc::clone(shared);
    let spawned = std::thread::Builder::new()
        .name(name)
        .stack_size(shared.stack_size)
        .spawn(move || worker_loop(worker_shared));
    match spawned {
        Ok(handle) => {
            shared.handles.lock().push(handle);
            Ok(())
        }
        Err(e) => {
            shared.live_workers.fetch_sub(1, Ordering::AcqRel);
            Err(e)
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut sentinel = Sentinel {
        shared: Arc::clone(&shared),
        armed: true,
    };

    while let Some(job) = shared.claim() {
        let Job {
            id,
            primitive,
            inputs,
            slot,
            permit,
        } = job;
        drop(permit);

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.backend.call(primitive, &inputs)
        }));
        metrics::record_primitive_latency("offload", started.elapsed());

        match outcome {
            Ok(result) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                if !slot.fulfil(result) {
                    tracing::trace!(id, %primitive, "offload result discarded; caller gone");
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                shared.faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!(id, %primitive, error = %message, "offload worker faulted; retiring");
                slot.fulfil(Err(DispatchError::WorkerFault(message)));
                // Sentinel is still armed: dropping it starts a replacement.
                return;
            }
        }
    }

    sentinel.armed = false;
}

/// Fixed pool of dedicated threads for long-running primitive calls.
///
/// # Example
///
/// ```rust,ignore
/// let pool = OffloadExecutor::new(&OffloadConfig::default(), Arc::new(RustCryptoBackend))?;
/// let pending = pool.submit(Primitive::Hash, vec![big_message]).await?;
/// let digest = pending.await?;
/// ```
pub struct OffloadExecutor {
    shared: Arc<Shared>,
    depth_limit: usize,
}

impl OffloadExecutor {
    /// Start `config.effective_pool_size()` workers.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ResourceExhausted`] if a worker thread cannot be
    /// spawned; workers already started are shut down again.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new(
        config: &OffloadConfig,
        backend: Arc<dyn PrimitiveBackend>,
    ) -> Result<Self, DispatchError> {
        let depth_limit = config.queue_depth_limit.clamp(1, Semaphore::MAX_PERMITS);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                open: true,
            }),
            available: Condvar::new(),
            permits: Arc::new(Semaphore::new(depth_limit)),
            backend,
            handles: Mutex::new(Vec::new()),
            thread_name: config.thread_name.clone(),
            stack_size: config.thread_stack_size,
            next_id: AtomicU64::new(0),
            next_thread: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            respawned: AtomicU64::new(0),
        });
        let executor = Self {
            shared,
            depth_limit,
        };

        let workers = config.effective_pool_size();
        for _ in 0..workers {
            if let Err(e) = spawn_worker(&executor.shared) {
                executor.shutdown();
                return Err(DispatchError::ResourceExhausted(format!(
                    "cannot spawn offload worker: {e}"
                )));
            }
        }

        tracing::info!(
            workers,
            queue_depth_limit = depth_limit,
            thread_name = %executor.shared.thread_name,
            "offload executor started"
        );
        Ok(executor)
    }

    /// Queue a request, suspending the calling task while the queue is full.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Shutdown`] if the executor has stopped accepting work.
    pub async fn submit(
        &self,
        primitive: Primitive,
        inputs: Vec<Vec<u8>>,
    ) -> Result<PendingResult, DispatchError> {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        self.enqueue(primitive, inputs, permit)
    }

    /// Queue a request, parking the calling OS thread while the queue is full.
    ///
    /// For threads outside the Tokio runtime; never call this from a runtime
    /// worker thread.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Shutdown`] if the executor has stopped accepting work.
    pub fn submit_blocking(
        &self,
        primitive: Primitive,
        inputs: Vec<Vec<u8>>,
    ) -> Result<PendingResult, DispatchError> {
        let permit =
            futures::executor::block_on(Arc::clone(&self.shared.permits).acquire_owned())
                .map_err(|_| DispatchError::Shutdown)?;
        self.enqueue(primitive, inputs, permit)
    }

    fn enqueue(
        &self,
        primitive: Primitive,
        inputs: Vec<Vec<u8>>,
        permit: OwnedSemaphorePermit,
    ) -> Result<PendingResult, DispatchError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let as_dequeue: Arc<dyn Dequeue> = self.shared.clone();
        let queue_handle: Weak<dyn Dequeue> = Arc::downgrade(&as_dequeue);
        let (slot, pending) = channel::channel(id, queue_handle);

        let accepted = {
            let mut queue = self.shared.queue.lock();
            if queue.open {
                queue.jobs.push_back(Job {
                    id,
                    primitive,
                    inputs,
                    slot,
                    permit,
                });
                metrics::set_offload_queue_depth(queue.jobs.len());
                true
            } else {
                false
            }
        };
        // `pending` must not be dropped under the queue lock: its Drop re-locks.
        if !accepted {
            return Err(DispatchError::Shutdown);
        }
        self.shared.available.notify_one();
        Ok(pending)
    }

    /// Current counters.
    pub fn stats(&self) -> OffloadStats {
        OffloadStats {
            workers: self.shared.live_workers.load(Ordering::Acquire),
            queued: self.shared.queue.lock().jobs.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled.load(Ordering::Relaxed),
            faults: self.shared.faults.load(Ordering::Relaxed),
            respawned: self.shared.respawned.load(Ordering::Relaxed),
        }
    }

    /// Maximum number of unclaimed requests.
    pub fn queue_depth_limit(&self) -> usize {
        self.depth_limit
    }

    /// `false` once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.shared.queue.lock().open
    }

    /// Stop intake, run every already-queued request, and join all workers.
    ///
    /// Blocks the calling thread until the pool is empty. Idempotent.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn shutdown(&self) {
        if self.shared.close() {
            tracing::info!(queued = self.stats().queued, "offload executor draining");
        }
        // Replacements spawned during drain land in `handles`; loop until none remain.
        loop {
            let handles = std::mem::take(&mut *self.shared.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!("offload worker exited by panic during shutdown");
                }
            }
        }
    }
}

impl Drop for OffloadExecutor {
    fn drop(&mut self) {
        // Workers drain on their own; do not block the dropping thread.
        self.shared.close();
    }
}

impl std::fmt::Debug for OffloadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadExecutor")
            .field("depth_limit", &self.depth_limit)
            .field("stats", &self.stats())
            .finish()
    }
}
