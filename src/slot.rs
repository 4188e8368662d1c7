//! The slot table: per-slot public descriptors and private execution records.
//!
//! Every job occupies one slot for its lifetime. The descriptor carries the
//! data an embedding reads and writes (target queue, entry point, payload,
//! scratch words); the execution record carries the dependency/child counters
//! and state machine, protected by a per-slot lock. Slots are addressed by
//! [`JobId`]s whose generation must match the descriptor's stored id, so
//! stale identifiers resolve to "already completed".

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::BufferRef;
use crate::context::JobMain;
use crate::id::{JobId, JobState, GENERATION_MASK};
use crate::queue::JobQueue;
use crate::MAX_WAITERS;

/// An `UnsafeCell` wrapper that can be shared across threads.
///
/// Correctness is ensured by the scheduling protocol rather than the type
/// system: a descriptor is written exclusively by its creating context before
/// submission and by the single executing worker afterwards, with all other
/// access read-only.
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    pub(crate) fn get(&self) -> *mut T {
        self.0.get()
    }
}

impl<T: Default> Default for SyncUnsafeCell<T> {
    fn default() -> Self {
        SyncUnsafeCell::new(T::default())
    }
}

/// Public per-job data.
///
/// Between `create_job` and `submit_job` the creating thread owns the
/// descriptor exclusively and fills in the fields below; afterwards the
/// scheduler treats them as read-only (the exit code excepted, which the
/// executing worker stores).
pub struct JobDescriptor {
    /// Queue the job is pushed to when it becomes ready. `None` selects the
    /// submitting context's queue at submit time.
    pub target: Option<Arc<JobQueue>>,
    /// The job implementation. `None` selects a no-op entry at submit time.
    pub entry: Option<JobMain>,
    /// Identifier of the parent job, or [`JobId::INVALID`] for none. A parent
    /// does not complete until all of its children have.
    pub parent: JobId,
    /// Opaque application scratch word.
    pub user1: usize,
    /// Opaque application scratch word.
    pub user2: usize,
    /// Exit code returned by the entry point's `Execute` call. The scheduler
    /// stores it without interpreting it.
    pub exit: i32,
    /// Packed identifier of the current occupant; invalidated at completion.
    pub(crate) id: AtomicU32,
    /// The buffer the payload and waiter list were allocated from.
    pub(crate) buffer: Option<BufferRef>,
    pub(crate) payload: *mut u8,
    pub(crate) payload_len: u32,
}

// SAFETY: the raw payload pointer targets buffer memory that stays alive
// while the job holds its buffer reference, and is only dereferenced by the
// thread that owns the job in the current phase (creator before submit,
// executing worker afterwards).
unsafe impl Send for JobDescriptor {}
unsafe impl Sync for JobDescriptor {}

impl JobDescriptor {
    /// The identifier of the job occupying this slot.
    pub fn id(&self) -> JobId {
        JobId::from_raw(self.id.load(Ordering::Relaxed))
    }

    /// Read access to the payload region.
    pub fn payload(&self) -> &[u8] {
        if self.payload.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.payload, self.payload_len as usize) }
        }
    }

    /// Write access to the payload region.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        if self.payload.is_null() {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.payload, self.payload_len as usize) }
        }
    }

    /// Raw pointer to the payload region, for embeddings that manage their
    /// own synchronization.
    pub fn payload_ptr(&self) -> *mut u8 {
        self.payload
    }

    /// Length of the payload region in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    pub(crate) fn store_id(&self, id: JobId) {
        self.id.store(id.to_raw(), Ordering::Relaxed);
    }
}

impl Default for JobDescriptor {
    fn default() -> Self {
        JobDescriptor {
            target: None,
            entry: None,
            parent: JobId::INVALID,
            user1: 0,
            user2: 0,
            exit: 0,
            id: AtomicU32::new(0),
            buffer: None,
            payload: std::ptr::null_mut(),
            payload_len: 0,
        }
    }
}

/// Private per-job execution state, guarded by the slot lock.
pub(crate) struct ExecRecord {
    /// Slot indices of jobs waiting on this one; points into the owning
    /// buffer, capacity [`MAX_WAITERS`].
    pub(crate) waiters: *mut u16,
    pub(crate) waiter_count: u32,
    /// Remaining uncompleted dependencies. Held at `-1` between create and
    /// submit so that a dependency completing mid-submission cannot make the
    /// job ready early; submission finalizes with `wait += registered + 1`.
    pub(crate) wait: i32,
    /// Uncompleted children plus one for the job itself.
    pub(crate) work: i32,
    pub(crate) state: JobState,
    /// Advances (mod 2^15) each time an occupant's completion is observed.
    pub(crate) generation: u32,
    /// Set when submission incremented the parent's `work`; completion
    /// recurses into the parent exactly when this is set.
    pub(crate) parent_armed: bool,
}

// SAFETY: the waiter pointer targets buffer memory kept alive by the job's
// buffer reference, and is only dereferenced under the slot lock.
unsafe impl Send for ExecRecord {}
unsafe impl Sync for ExecRecord {}

impl Default for ExecRecord {
    fn default() -> Self {
        ExecRecord {
            waiters: std::ptr::null_mut(),
            waiter_count: 0,
            wait: 0,
            work: 0,
            state: JobState::Uninitialized,
            generation: 0,
            parent_armed: false,
        }
    }
}

impl ExecRecord {
    /// Re-initializes the record for a fresh occupant.
    pub(crate) fn begin(&mut self, waiters: NonNull<u8>) {
        self.waiters = waiters.as_ptr().cast();
        self.waiter_count = 0;
        self.wait = -1;
        self.work = 1;
        self.state = JobState::NotSubmitted;
        self.parent_armed = false;
    }

    /// Appends a waiter slot index. Returns false when the list is full.
    pub(crate) fn push_waiter(&mut self, slot: u16) -> bool {
        if self.waiter_count as usize == MAX_WAITERS {
            return false;
        }
        unsafe { *self.waiters.add(self.waiter_count as usize) = slot };
        self.waiter_count += 1;
        true
    }

    /// Copies the waiter list out so it can be walked without the lock held.
    pub(crate) fn copy_waiters(&self, out: &mut [u16; MAX_WAITERS]) -> usize {
        let count = self.waiter_count as usize;
        unsafe { std::ptr::copy_nonoverlapping(self.waiters, out.as_mut_ptr(), count) };
        count
    }

    /// Retires the current occupant's generation.
    pub(crate) fn retire(&mut self) {
        self.generation = (self.generation + 1) & GENERATION_MASK;
    }
}

/// One entry of the scheduler's slot table.
#[derive(Default)]
pub(crate) struct JobSlot {
    pub(crate) desc: SyncUnsafeCell<JobDescriptor>,
    pub(crate) record: RwLock<ExecRecord>,
}

impl JobSlot {
    /// Reads the descriptor if `id` still names the live occupant.
    ///
    /// The id comparison is a relaxed read: it is exact for any identifier
    /// whose completion has been observed by the calling thread, and
    /// otherwise only ever errs toward reporting a job still live.
    pub(crate) fn resolve(&self, id: JobId) -> Option<&JobDescriptor> {
        if !id.is_valid() {
            return None;
        }
        let desc = unsafe { &*self.desc.get() };
        (desc.id() == id).then_some(desc)
    }

    /// Attempts to cancel the occupant named by `id`.
    ///
    /// Reads the state through the lock: `Running` and `Completed` occupants
    /// are left alone and their state reported; anything else becomes
    /// `Canceled`. A stale id reports `Uninitialized` without touching the
    /// slot's current occupant.
    pub(crate) fn cancel(&self, id: JobId) -> JobState {
        let mut record = self.record.write();
        if self.resolve(id).is_none() {
            return JobState::Uninitialized;
        }
        match record.state {
            JobState::Running | JobState::Completed => record.state,
            _ => {
                record.state = JobState::Canceled;
                JobState::Canceled
            }
        }
    }
}
