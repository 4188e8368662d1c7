//! The scheduler: owner of the slot table, the buffer pool, the context free
//! list and the queue registry.
//!
//! A scheduler coordinates application-owned OS threads; it runs nothing by
//! itself. Threads acquire a [`JobContext`] bound to a wait queue, drive jobs
//! through it, and release it when they are done. Queues are created
//! independently and registered here (reference-counted) as contexts bind to
//! them, so [`terminate`](JobScheduler::terminate) can reach every thread.

use std::sync::Arc;
use std::thread::ThreadId;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

use crate::buffer::BufferPool;
use crate::context::{ContextInner, JobContext};
use crate::id::{JobId, JobState};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::queue::{JobQueue, SIGNAL_TERMINATE};
use crate::slot::{JobDescriptor, JobSlot};
use crate::{JOBS_PER_BUFFER, JOB_SLOT_COUNT, MAX_QUEUES};

struct ContextPool {
    free: Vec<Box<ContextInner>>,
    total: usize,
}

struct RegistryEntry {
    id: u32,
    queue: Arc<JobQueue>,
    refs: u32,
}

/// Coordinator for slot-based job scheduling across application threads.
pub struct JobScheduler {
    pub(crate) slots: Box<[CachePadded<JobSlot>]>,
    pub(crate) buffers: BufferPool,
    contexts: RwLock<ContextPool>,
    registry: RwLock<Vec<RegistryEntry>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl JobScheduler {
    /// Allocates a scheduler with its full slot table, pre-allocating
    /// `context_count` contexts and as many job buffers.
    ///
    /// A `context_count` of zero selects a default of 16. Returns `None` if
    /// buffer backing storage cannot be allocated.
    pub fn create(context_count: usize) -> Option<Arc<JobScheduler>> {
        let context_count = if context_count == 0 { 16 } else { context_count };
        let slots: Box<[CachePadded<JobSlot>]> = (0..JOB_SLOT_COUNT)
            .map(|_| CachePadded::new(JobSlot::default()))
            .collect();
        let buffers = BufferPool::new(JOB_SLOT_COUNT.div_ceil(JOBS_PER_BUFFER));
        buffers.preallocate(context_count)?;
        let free = (0..context_count)
            .map(|_| {
                Box::new(ContextInner {
                    active: None,
                    job_count: 0,
                })
            })
            .collect();
        Some(Arc::new(JobScheduler {
            slots,
            buffers,
            contexts: RwLock::new(ContextPool {
                free,
                total: context_count,
            }),
            registry: RwLock::new(Vec::with_capacity(MAX_QUEUES)),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }))
    }

    /// Binds a context to `queue` on behalf of `owner`.
    ///
    /// Pops a pooled context (allocating one on demand), gives it an active
    /// buffer and registers the queue. Returns `None` when buffer storage is
    /// exhausted or the queue registry is full.
    pub fn acquire_context(
        scheduler: &Arc<JobScheduler>,
        queue: &Arc<JobQueue>,
        owner: ThreadId,
    ) -> Option<JobContext> {
        let mut inner = {
            let mut pool = scheduler.contexts.write();
            match pool.free.pop() {
                Some(inner) => inner,
                None => {
                    pool.total += 1;
                    Box::new(ContextInner {
                        active: None,
                        job_count: 0,
                    })
                }
            }
        };
        match scheduler.buffers.acquire(None) {
            Some(active) => {
                inner.active = Some(active);
                inner.job_count = 0;
            }
            None => {
                scheduler.contexts.write().free.push(inner);
                return None;
            }
        }
        if !scheduler.register_queue(queue) {
            if let Some(buf) = inner.active.take() {
                scheduler.buffers.release(buf);
            }
            scheduler.contexts.write().free.push(inner);
            return None;
        }
        Some(JobContext {
            sched: Arc::clone(scheduler),
            queue: Arc::clone(queue),
            inner,
            owner,
        })
    }

    /// Returns a context to the free list, releasing its active buffer and
    /// dropping its reference on the queue registry entry.
    pub fn release_context(&self, ctx: JobContext) {
        debug_assert!(
            std::ptr::eq(Arc::as_ptr(&ctx.sched), self),
            "context released to a scheduler that did not create it"
        );
        let JobContext {
            queue, mut inner, ..
        } = ctx;
        if let Some(buf) = inner.active.take() {
            self.buffers.release(buf);
        }
        inner.job_count = 0;
        self.contexts.write().free.push(inner);
        self.unregister_queue(queue.id());
    }

    fn register_queue(&self, queue: &Arc<JobQueue>) -> bool {
        let mut registry = self.registry.write();
        if let Some(entry) = registry.iter_mut().find(|e| e.id == queue.id()) {
            entry.refs += 1;
            true
        } else if registry.len() < MAX_QUEUES {
            registry.push(RegistryEntry {
                id: queue.id(),
                queue: Arc::clone(queue),
                refs: 1,
            });
            true
        } else {
            false
        }
    }

    fn unregister_queue(&self, id: u32) {
        let mut registry = self.registry.write();
        if let Some(pos) = registry.iter().position(|e| e.id == id) {
            registry[pos].refs -= 1;
            if registry[pos].refs == 0 {
                registry.swap_remove(pos);
            }
        }
    }

    /// Sends the terminate signal to every registered queue, releasing all
    /// parked threads. Callers then join their workers.
    pub fn terminate(&self) {
        let registry = self.registry.read();
        for entry in registry.iter() {
            entry.queue.signal(SIGNAL_TERMINATE);
        }
    }

    /// Looks up a registered queue by its identifier.
    pub fn get_queue(&self, queue_id: u32) -> Option<Arc<JobQueue>> {
        let registry = self.registry.read();
        registry
            .iter()
            .find(|e| e.id == queue_id)
            .map(|e| Arc::clone(&e.queue))
    }

    /// Number of contexts currently bound to the queue with `queue_id`,
    /// which is the number of threads servicing it.
    pub fn worker_count(&self, queue_id: u32) -> u32 {
        let registry = self.registry.read();
        registry
            .iter()
            .find(|e| e.id == queue_id)
            .map_or(0, |e| e.refs)
    }

    /// Attempts to cancel the job named by `id`.
    ///
    /// Running and completed jobs are left alone and their state returned; a
    /// stale or invalid id returns `Uninitialized`. Cancellation is
    /// cooperative: a ready job is observed canceled when a worker pulls it,
    /// and descendants observe it through the ancestor scan.
    pub fn cancel(&self, id: JobId) -> JobState {
        if !id.is_valid() {
            return JobState::Uninitialized;
        }
        match self.slots.get(id.slot()) {
            Some(slot) => slot.cancel(id),
            None => JobState::Uninitialized,
        }
    }

    /// Resolves an identifier to its descriptor. `None` means the identifier
    /// is stale: the cheap way to detect an already-completed job.
    pub fn resolve(&self, id: JobId) -> Option<&JobDescriptor> {
        if !id.is_valid() {
            return None;
        }
        self.slots.get(id.slot())?.resolve(id)
    }

    /// `(created, free)` job-buffer counts, for diagnostics and accounting
    /// checks.
    pub fn buffer_counts(&self) -> (usize, usize) {
        self.buffers.counts()
    }

    /// Total number of contexts the scheduler has ever handed out storage
    /// for.
    pub fn context_count(&self) -> usize {
        self.contexts.read().total
    }

    /// Scheduler-wide event counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
