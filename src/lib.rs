//! # jobslab - Slot-Based Dependency-Tracking Job Scheduler
//!
//! A fine-grained task scheduler for embarrassingly-parallel and
//! dependency-constrained work on multicore hosts. There is no runtime:
//! the scheduler coordinates application-owned OS threads, each driving
//! jobs through its own [`JobContext`].
//!
//! ## Architecture
//!
//! - **Slot table**: jobs live in a fixed table addressed by packed
//!   (index, generation) identifiers, so stale ids dereference safely to
//!   "already completed".
//! - **Job buffers**: payloads and waiter lists are bump-allocated from
//!   reference-counted, free-listed buffers; a job keeps its buffer alive
//!   until it completes.
//! - **Ready queues**: bounded waitable MPMC rings with a signal word that
//!   releases every parked thread for shutdown.
//! - **Cooperative waits**: a thread waiting on a job helps drain its own
//!   queue instead of blocking idly.
//!
//! ## Example
//!
//! ```no_run
//! use jobslab::{JobCall, JobQueue, JobScheduler, SubmitKind, WorkerPool};
//!
//! let queue = JobQueue::new(0);
//! let scheduler = JobScheduler::create(4).expect("scheduler allocation failed");
//! let pool = WorkerPool::new(scheduler.clone(), queue.clone(), 3);
//!
//! let mut ctx =
//!     JobScheduler::acquire_context(&scheduler, &queue, std::thread::current().id())
//!     .expect("context");
//!
//! let job = ctx.create_job(0, 1).expect("job slot");
//! job.entry = Some(|_ctx, _job, call| {
//!     if call == JobCall::Execute {
//!         println!("hello from a job");
//!     }
//!     0
//! });
//! let id = job.id();
//! let _ = ctx.submit_job(id, &[], SubmitKind::Run);
//! ctx.wait_job(id);
//!
//! scheduler.release_context(ctx);
//! pool.shutdown().expect("worker panicked");
//! ```

/// Capacity of the slot table and of every ready queue. Must be a power of
/// two; slot indices fit in 16 bits.
pub const JOB_SLOT_COUNT: usize = 65_536;

/// Number of job slots served by a single job buffer. Slot indices are
/// partitioned by buffer: buffer `i` owns slots
/// `i * JOBS_PER_BUFFER .. (i + 1) * JOBS_PER_BUFFER`.
pub const JOBS_PER_BUFFER: usize = 64;

/// Byte capacity of a job buffer.
pub const JOB_BUFFER_SIZE: usize = JOBS_PER_BUFFER * 1024;

/// Maximum number of jobs that can register to wait on one job.
pub const MAX_WAITERS: usize = 32;

/// Maximum number of queues the scheduler's registry can hold.
pub const MAX_QUEUES: usize = 16;

mod buffer;
pub mod context;
pub mod id;
pub mod metrics;
pub mod queue;
pub mod scheduler;
mod slot;
pub mod trace;
pub mod worker;

pub use context::{JobContext, JobMain};
pub use id::{JobCall, JobId, JobState, SubmitKind, SubmitResult};
pub use queue::{JobQueue, SIGNAL_CLEAR, SIGNAL_TERMINATE, SIGNAL_USER};
pub use scheduler::JobScheduler;
pub use slot::JobDescriptor;
pub use worker::{PinningStrategy, Worker, WorkerPool};
