//! Per-thread job context: the handle through which jobs are created,
//! submitted, executed and completed.
//!
//! A context binds its owning thread to a default wait queue and an active
//! job buffer. Every operation here must be called from the thread that
//! currently owns the context; ownership can be re-assigned through
//! [`JobContext::set_owner`] for recovery after a worker crash.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::buffer::BufferRef;
use crate::id::{JobCall, JobId, JobState, SubmitKind, SubmitResult};
use crate::queue::JobQueue;
use crate::scheduler::JobScheduler;
use crate::slot::JobDescriptor;
use crate::trace::TraceGuard;
use crate::{JOBS_PER_BUFFER, JOB_BUFFER_SIZE, MAX_WAITERS};

/// Function pointer type for job implementations.
///
/// Invoked with [`JobCall::Execute`] when the job is pulled from its ready
/// queue, and exactly once with [`JobCall::Cleanup`] when the job and all of
/// its children have completed (possibly from a different thread). A job
/// canceled before it ran receives only the cleanup call. The return value of
/// the execute call is stored as the job's exit code.
pub type JobMain = fn(&mut JobContext, &JobDescriptor, JobCall) -> i32;

/// The default entry point installed when a job is submitted without one.
pub(crate) fn noop_entry(_ctx: &mut JobContext, _job: &JobDescriptor, _call: JobCall) -> i32 {
    0
}

/// Context state recycled through the scheduler's free list.
pub(crate) struct ContextInner {
    pub(crate) active: Option<BufferRef>,
    pub(crate) job_count: u32,
}

/// Per-thread handle for creating and running jobs.
pub struct JobContext {
    pub(crate) sched: Arc<JobScheduler>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) inner: Box<ContextInner>,
    pub(crate) owner: ThreadId,
}

impl JobContext {
    #[inline]
    fn assert_owner(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "job context used from a thread that does not own it"
        );
    }

    /// The scheduler this context was acquired from.
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.sched
    }

    /// The queue this context waits on and submits to by default.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// The thread that currently owns the context.
    pub fn thread_id(&self) -> ThreadId {
        self.owner
    }

    /// Re-assigns the owning thread, e.g. when a replacement worker adopts
    /// the context after a crash.
    pub fn set_owner(&mut self, owner: ThreadId) {
        self.owner = owner;
    }

    /// Allocates a job with a payload of `size` bytes at `align`.
    ///
    /// The waiter list and payload come from the context's active buffer; on
    /// overflow the partial allocation is rolled back and a fresh buffer is
    /// acquired (jobs already written to the old buffer keep it alive through
    /// their references). Returns the slot's descriptor with all fields reset;
    /// the caller fills in `entry`, `target`, `parent` and the payload before
    /// submitting. Returns `None` if buffer storage is exhausted or the
    /// payload cannot fit in a buffer at all.
    pub fn create_job(&mut self, size: usize, align: usize) -> Option<&mut JobDescriptor> {
        self.assert_owner();
        let align = align.max(1);
        debug_assert!(align.is_power_of_two());
        let waiter_bytes = MAX_WAITERS * std::mem::size_of::<u16>();
        if size > JOB_BUFFER_SIZE - waiter_bytes {
            debug_assert!(
                size <= JOB_BUFFER_SIZE - waiter_bytes,
                "job payload exceeds buffer capacity"
            );
            return None;
        }

        if self.inner.active.is_none() {
            self.inner.active = self.sched.buffers.acquire(None);
            self.inner.job_count = 0;
        }
        let mut buf = self.inner.active?;

        let mut rolled = false;
        let (waiters, payload) = loop {
            let mark = buf.mark();
            if let Some(waiters) = buf.alloc(waiter_bytes, std::mem::align_of::<u16>()) {
                if size == 0 {
                    break (waiters, None);
                }
                if let Some(payload) = buf.alloc(size, align) {
                    break (waiters, Some(payload));
                }
            }
            buf.rewind(mark);
            if rolled {
                return None;
            }
            rolled = true;
            match self.sched.buffers.acquire(Some(buf)) {
                Some(next) => {
                    self.inner.active = Some(next);
                    self.inner.job_count = 0;
                    buf = next;
                }
                None => {
                    // The owner reference is gone; retry from a clean state
                    // on the next create.
                    self.inner.active = None;
                    return None;
                }
            }
        };

        let slot_index = buf.slot_base() + self.inner.job_count;
        buf.add_ref();

        let slot = &self.sched.slots[slot_index as usize];
        let generation = {
            let mut record = slot.record.write();
            record.begin(waiters);
            record.generation
        };
        let id = JobId::pack(slot_index, generation);

        // The slot is unoccupied until this id escapes, so the descriptor is
        // exclusively ours to initialize.
        let desc = unsafe { &mut *slot.desc.get() };
        desc.target = None;
        desc.entry = None;
        desc.parent = JobId::INVALID;
        desc.user1 = 0;
        desc.user2 = 0;
        desc.exit = 0;
        desc.buffer = Some(buf);
        desc.payload = payload.map_or(std::ptr::null_mut(), |p| p.as_ptr());
        desc.payload_len = size as u32;
        desc.store_id(id);

        // Roll over once this buffer's slot range is used up.
        if self.inner.job_count + 1 == JOBS_PER_BUFFER as u32 {
            self.inner.active = self.sched.buffers.acquire(Some(buf));
            self.inner.job_count = 0;
        } else {
            self.inner.job_count += 1;
        }

        #[cfg(feature = "metrics")]
        self.sched.metrics.jobs_created();

        Some(desc)
    }

    /// Submits a job, registering it on each live dependency and with its
    /// parent, then commits the wait count.
    ///
    /// The `-1` creation sentinel plus the final `+ registered + 1` fixup
    /// make the ready transition happen exactly once even when dependencies
    /// complete concurrently with submission. A `Cancel` submission skips
    /// dependency registration and enqueues the job in a canceled state so a
    /// worker performs the usual completion housekeeping.
    pub fn submit_job(&mut self, job: JobId, deps: &[JobId], kind: SubmitKind) -> SubmitResult {
        self.assert_owner();
        if !job.is_valid() {
            return SubmitResult::InvalidJob;
        }
        let job_slot_index = job.slot();
        let Some(slot) = self.sched.slots.get(job_slot_index) else {
            return SubmitResult::InvalidJob;
        };
        if slot.resolve(job).is_none() {
            return SubmitResult::InvalidJob;
        }

        // Default the target and entry; the descriptor is still owned by the
        // submitting thread. The target must be in place before any waiter
        // registration so a completing dependency can enqueue this job.
        let desc_ptr = slot.desc.get();
        unsafe {
            if (*desc_ptr).target.is_none() {
                (*desc_ptr).target = Some(self.queue.clone());
            }
            if (*desc_ptr).entry.is_none() {
                (*desc_ptr).entry = Some(noop_entry);
            }
        }
        let parent = unsafe { (*desc_ptr).parent };

        let mut result = SubmitResult::Success;
        let mut wait_count: i32 = 0;
        let mut canceled = kind == SubmitKind::Cancel;

        if kind == SubmitKind::Run {
            for &dep in deps {
                if !dep.is_valid() {
                    continue;
                }
                let Some(dep_slot) = self.sched.slots.get(dep.slot()) else {
                    continue;
                };
                let mut dep_record = dep_slot.record.write();
                if dep_slot.resolve(dep).is_none() {
                    continue; // retired: already completed
                }
                if dep_record.state == JobState::Completed
                    || dep_record.state == JobState::Canceled
                {
                    continue;
                }
                if dep_record.push_waiter(job_slot_index as u16) {
                    wait_count += 1;
                } else {
                    // The dependency cannot take another waiter. Convert the
                    // submission into a cancellation: the job never runs, and
                    // the dependencies it did register on drive it through
                    // the normal completion path so its buffer reference and
                    // parent accounting are reclaimed.
                    result = SubmitResult::TooManyWaiters;
                    canceled = true;
                    break;
                }
            }
        }

        // Register as outstanding work with the parent so the parent cannot
        // complete before this job does. Completion recurses into the parent
        // only when this increment actually happened.
        let mut armed = false;
        if parent.is_valid() {
            if let Some(parent_slot) = self.sched.slots.get(parent.slot()) {
                let mut parent_record = parent_slot.record.write();
                if parent_slot.resolve(parent).is_some()
                    && parent_record.state != JobState::Canceled
                {
                    parent_record.work += 1;
                    armed = true;
                }
            }
        }

        // Commit. Dependencies that completed between registration and here
        // have already decremented `wait`; the +1 cancels the creation
        // sentinel, and a result of zero means the job is ready now.
        let ready = {
            let mut record = slot.record.write();
            record.parent_armed = armed;
            record.wait += wait_count + 1;
            let ready = record.wait == 0;
            if record.state != JobState::Canceled {
                record.state = if canceled {
                    JobState::Canceled
                } else if ready {
                    JobState::Ready
                } else {
                    JobState::NotReady
                };
            }
            ready
        };

        #[cfg(feature = "metrics")]
        self.sched.metrics.jobs_submitted();

        if ready {
            let target = unsafe { (*desc_ptr).target.clone() };
            if let Some(target) = target {
                target.push(job);
                #[cfg(feature = "metrics")]
                self.sched.metrics.ready_pushes();
            }
        }
        result
    }

    /// Attempts to cancel a job; equivalent to
    /// [`JobScheduler::cancel`](crate::JobScheduler::cancel).
    pub fn cancel_job(&self, id: JobId) -> JobState {
        self.sched.cancel(id)
    }

    /// Vets a job pulled from the queue: a job with a canceled ancestor (or
    /// one canceled itself) is completed here as housekeeping and `None` is
    /// returned; otherwise the job is marked `Running` and handed back.
    fn admit_ready(&mut self, job: JobId) -> Option<JobId> {
        // Walk the ancestor chain. A retired ancestor has completed and
        // cannot cancel us; stop there.
        let mut canceled = false;
        let mut cursor = job;
        loop {
            let Some(slot) = self.sched.slots.get(cursor.slot()) else {
                break;
            };
            let Some(desc) = slot.resolve(cursor) else {
                break;
            };
            if slot.record.read().state == JobState::Canceled {
                canceled = true;
                break;
            }
            let parent = desc.parent;
            if !parent.is_valid() {
                break;
            }
            cursor = parent;
        }

        let slot = &self.sched.slots[job.slot()];
        if !canceled {
            // Re-check under the write lock: a cancel that landed after the
            // scan has already reported `Canceled` to its caller, so the job
            // must not run.
            let mut record = slot.record.write();
            if record.state != JobState::Canceled {
                record.state = JobState::Running;
                return Some(job);
            }
        } else {
            let mut record = slot.record.write();
            if record.state != JobState::Canceled {
                record.state = JobState::Canceled;
            }
        }
        self.complete_job(job);
        None
    }

    /// Waits for a ready-to-run job on the context's queue.
    ///
    /// Jobs observed to be canceled (directly or through any ancestor in the
    /// parent chain) are completed here as housekeeping and never returned;
    /// the returned job has been marked `Running`. Returns `None` when the
    /// queue is signaled.
    pub fn wait_ready_job(&mut self) -> Option<JobId> {
        self.assert_owner();
        loop {
            let job = self.queue.take()?;
            #[cfg(feature = "metrics")]
            self.sched.metrics.ready_takes();
            if let Some(job) = self.admit_ready(job) {
                return Some(job);
            }
        }
    }

    /// Runs a job taken from [`wait_ready_job`](JobContext::wait_ready_job):
    /// invokes its entry point in `Execute` mode, stores the exit code and
    /// completes the job. Returns the exit code.
    pub fn execute_job(&mut self, job: JobId) -> i32 {
        self.assert_owner();
        let Some(slot) = self.sched.slots.get(job.slot()) else {
            debug_assert!(false, "execute_job on an out-of-range slot");
            return 0;
        };
        if slot.resolve(job).is_none() {
            debug_assert!(false, "execute_job on a retired job");
            return 0;
        }
        // Detach the descriptor reference from the scheduler borrow; the slot
        // table lives for as long as the Arc held by this context.
        let desc: &JobDescriptor = unsafe { &*(slot.desc.get() as *const JobDescriptor) };
        let entry = desc.entry.unwrap_or(noop_entry);
        let exit = {
            let _span = TraceGuard::new("execute", job.slot());
            entry(self, desc, JobCall::Execute)
        };
        // Sole writer: this worker owns the job while it is running.
        unsafe { (*self.sched.slots[job.slot()].desc.get()).exit = exit };
        self.complete_job(job);
        exit
    }

    /// Cooperatively waits for `id` to complete.
    ///
    /// Instead of blocking idly, the calling thread pulls and executes ready
    /// jobs from its own queue until the waited job is observed `Completed`
    /// or `Canceled` (returning `true`), or the queue is signaled (returning
    /// `false`). A stale identifier has already completed and returns `true`
    /// immediately.
    ///
    /// The queue poll is bounded so the wait stays responsive when the
    /// waited job is finished by another thread while this queue is empty.
    pub fn wait_job(&mut self, id: JobId) -> bool {
        const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

        self.assert_owner();
        if !id.is_valid() {
            return false;
        }
        loop {
            let Some(slot) = self.sched.slots.get(id.slot()) else {
                return false;
            };
            if slot.resolve(id).is_none() {
                return true; // generation retired: completed
            }
            let state = slot.record.read().state;
            if state == JobState::Completed || state == JobState::Canceled {
                return true;
            }
            match self.queue.take_timeout(POLL_INTERVAL) {
                Some(job) => {
                    #[cfg(feature = "metrics")]
                    self.sched.metrics.ready_takes();
                    if let Some(job) = self.admit_ready(job) {
                        self.execute_job(job);
                    }
                }
                None => {
                    if self.queue.check_signal() != crate::queue::SIGNAL_CLEAR {
                        return false;
                    }
                }
            }
        }
    }

    /// Signals completion of a job whose entry point has returned (or which
    /// was canceled before running).
    ///
    /// Decrements the job's `work` counter; the decrement that reaches zero
    /// is the true completion: the entry point's cleanup call runs, the
    /// buffer reference taken at creation is released, every registered
    /// waiter's `wait` is decremented (pushing those that become ready), and
    /// completion recurses into the parent if submission armed it.
    pub fn complete_job(&mut self, job: JobId) {
        self.assert_owner();
        if !job.is_valid() {
            return;
        }
        let Some(slot) = self.sched.slots.get(job.slot()) else {
            return;
        };

        let mut wait_list = [0u16; MAX_WAITERS];
        let mut waiter_count = 0;
        let mut recurse_parent = JobId::INVALID;
        let completed;
        #[cfg(feature = "metrics")]
        let mut was_canceled = false;
        {
            let mut record = slot.record.write();
            if slot.resolve(job).is_none() {
                debug_assert!(false, "complete_job on a retired job");
                return;
            }
            record.work -= 1;
            debug_assert!(record.work >= 0, "job completed more times than it has work");
            completed = record.work == 0;
            if completed {
                waiter_count = record.copy_waiters(&mut wait_list);
                if record.state != JobState::Canceled {
                    record.state = JobState::Completed;
                } else {
                    #[cfg(feature = "metrics")]
                    {
                        was_canceled = true;
                    }
                }
                if record.parent_armed {
                    record.parent_armed = false;
                    recurse_parent = unsafe { (*slot.desc.get()).parent };
                }
                // Retire the occupant: outstanding ids stop resolving from
                // this point on.
                record.retire();
                unsafe { (*slot.desc.get()).store_id(JobId::INVALID) };
            }
        }
        if !completed {
            return;
        }

        // Cleanup phase, then drop the buffer reference that kept the payload
        // and waiter list alive.
        let desc: &JobDescriptor = unsafe { &*(slot.desc.get() as *const JobDescriptor) };
        let entry = desc.entry.unwrap_or(noop_entry);
        {
            let _span = TraceGuard::new("cleanup", job.slot());
            let _ = entry(self, desc, JobCall::Cleanup);
        }
        if let Some(buffer) = desc.buffer {
            self.sched.buffers.release(buffer);
        }

        #[cfg(feature = "metrics")]
        if was_canceled {
            self.sched.metrics.jobs_canceled();
        } else {
            self.sched.metrics.jobs_completed();
        }

        // Release the jobs waiting on this one. Pushes happen outside the
        // waiter's record lock.
        for &waiter_slot in &wait_list[..waiter_count] {
            let ws = &self.sched.slots[waiter_slot as usize];
            let ready = {
                let mut waiter_record = ws.record.write();
                waiter_record.wait -= 1;
                if waiter_record.wait == 0 {
                    if waiter_record.state != JobState::Canceled {
                        waiter_record.state = JobState::Ready;
                    }
                    true
                } else {
                    false
                }
            };
            if ready {
                let (target, waiter_id) = unsafe {
                    let d = &*ws.desc.get();
                    (d.target.clone(), d.id())
                };
                if let Some(target) = target {
                    target.push(waiter_id);
                    #[cfg(feature = "metrics")]
                    self.sched.metrics.ready_pushes();
                }
            }
        }

        if recurse_parent.is_valid() {
            self.complete_job(recurse_parent);
        }
    }
}
