//! Worker thread pool.
//!
//! The scheduler itself never starts threads; this module is the convenience
//! embedding most hosts want: a pool of OS threads that each acquire a
//! context bound to one queue, drain ready jobs until the queue is signaled,
//! and release the context on the way out.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use core_affinity::CoreId;

use crate::context::JobContext;
use crate::queue::JobQueue;
use crate::scheduler::JobScheduler;
use crate::trace;

/// How worker threads are mapped onto CPU cores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinningStrategy {
    /// Let the OS schedule worker threads freely.
    None,
    /// Pin worker i to core i (mod core count).
    Linear,
    /// Pin workers to every other logical core, skipping SMT siblings.
    AvoidSMT,
}

/// A worker thread draining one ready queue.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        scheduler: Arc<JobScheduler>,
        queue: Arc<JobQueue>,
        core_id: Option<CoreId>,
    ) -> Worker {
        let handle = thread::spawn(move || {
            if let Some(core_id) = core_id {
                core_affinity::set_for_current(core_id);
            }
            let _collector = trace::CollectorGuard;
            let Some(mut ctx) = JobScheduler::acquire_context(&scheduler, &queue, thread::current().id()) else {
                eprintln!("worker {}: failed to acquire a job context", id);
                return;
            };
            Worker::run_loop(&mut ctx);
            scheduler.release_context(ctx);
        });
        Worker {
            id,
            handle: Some(handle),
        }
    }

    /// Pulls and executes ready jobs until the queue is signaled.
    fn run_loop(ctx: &mut JobContext) {
        while let Some(job) = ctx.wait_ready_job() {
            ctx.execute_job(job);
        }
    }

    /// The worker's index within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// A pool of worker threads bound to a single ready queue.
pub struct WorkerPool {
    scheduler: Arc<JobScheduler>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawns `num_threads` unpinned workers servicing `queue`.
    pub fn new(scheduler: Arc<JobScheduler>, queue: Arc<JobQueue>, num_threads: usize) -> Self {
        Self::with_strategy(scheduler, queue, num_threads, PinningStrategy::None)
    }

    /// Spawns workers mapped onto cores according to `strategy`.
    pub fn with_strategy(
        scheduler: Arc<JobScheduler>,
        queue: Arc<JobQueue>,
        num_threads: usize,
        strategy: PinningStrategy,
    ) -> Self {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let mapped: Vec<Option<CoreId>> = match strategy {
            PinningStrategy::None => vec![None; num_threads],
            PinningStrategy::Linear => (0..num_threads)
                .map(|i| core_ids.get(i % core_ids.len().max(1)).copied())
                .collect(),
            PinningStrategy::AvoidSMT => {
                let physical: Vec<_> = core_ids.iter().step_by(2).copied().collect();
                (0..num_threads)
                    .map(|i| physical.get(i % physical.len().max(1)).copied())
                    .collect()
            }
        };

        let workers = mapped
            .into_iter()
            .enumerate()
            .map(|(id, core_id)| {
                Worker::spawn(id, Arc::clone(&scheduler), Arc::clone(&queue), core_id)
            })
            .collect();

        WorkerPool { scheduler, workers }
    }

    /// Number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Terminates the scheduler's queues and joins every worker.
    ///
    /// Returns `Err` with the number of workers that panicked, if any.
    pub fn shutdown(self) -> Result<(), usize> {
        self.scheduler.terminate();
        let mut failed = 0;
        for worker in self.workers {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed += 1;
                eprintln!("worker {} panicked during execution", worker_id);
            }
        }
        if failed > 0 {
            Err(failed)
        } else {
            Ok(())
        }
    }
}
