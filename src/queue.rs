//! Waitable ready-to-run queue.
//!
//! A bounded MPMC ring sized to the slot table, with monotonically increasing
//! 64-bit push/take counters (`index = counter & mask`), producer and
//! consumer condition variables, and a signal word that releases every parked
//! thread at once. Because the capacity equals the slot count, a full queue
//! would mean every live job is enqueued simultaneously, which the scheduler
//! invariants rule out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};

use crate::id::JobId;
use crate::JOB_SLOT_COUNT;

/// Signal value meaning "not signaled"; threads may park on the queue.
pub const SIGNAL_CLEAR: u32 = 0;
/// Signal value instructing every thread parked on the queue to terminate.
pub const SIGNAL_TERMINATE: u32 = 1;
/// First signal value available for application-defined use.
pub const SIGNAL_USER: u32 = 2;

struct Ring {
    entries: Box<[JobId]>,
    push_count: u64,
    take_count: u64,
}

/// Waitable FIFO of ready-to-run job identifiers.
pub struct JobQueue {
    id: u32,
    /// Written under the ring mutex; read without it by `check_signal`.
    signal: AtomicU32,
    ring: CachePadded<Mutex<Ring>>,
    consumer_cv: Condvar,
    producer_cv: Condvar,
}

impl JobQueue {
    /// Creates an empty queue carrying an application-defined identifier.
    ///
    /// The identifier is what the scheduler's queue registry keys on; queues
    /// with distinct roles should use distinct ids.
    pub fn new(id: u32) -> Arc<JobQueue> {
        Arc::new(JobQueue {
            id,
            signal: AtomicU32::new(SIGNAL_CLEAR),
            ring: CachePadded::new(Mutex::new(Ring {
                entries: vec![JobId::INVALID; JOB_SLOT_COUNT].into_boxed_slice(),
                push_count: 0,
                take_count: 0,
            })),
            consumer_cv: Condvar::new(),
            producer_cv: Condvar::new(),
        })
    }

    /// The application-defined identifier of the queue.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Pushes a ready job, blocking while the queue is full and unsignaled.
    ///
    /// Returns `false` without enqueueing if the queue is signaled.
    pub fn push(&self, job: JobId) -> bool {
        let mask = (JOB_SLOT_COUNT - 1) as u64;
        let mut ring = self.ring.lock();
        while ring.push_count - ring.take_count == JOB_SLOT_COUNT as u64
            && self.signal.load(Ordering::Relaxed) == SIGNAL_CLEAR
        {
            self.producer_cv.wait(&mut ring);
        }
        if self.signal.load(Ordering::Relaxed) != SIGNAL_CLEAR {
            return false;
        }
        let index = (ring.push_count & mask) as usize;
        ring.entries[index] = job;
        ring.push_count += 1;
        drop(ring);
        self.consumer_cv.notify_one();
        true
    }

    /// Takes the oldest ready job, blocking while the queue is empty and
    /// unsignaled.
    ///
    /// Returns `None` if the queue is signaled, regardless of remaining
    /// contents; recovery paths use [`flush`](JobQueue::flush) to discard
    /// them.
    pub fn take(&self) -> Option<JobId> {
        let mask = (JOB_SLOT_COUNT - 1) as u64;
        let mut ring = self.ring.lock();
        while ring.take_count == ring.push_count
            && self.signal.load(Ordering::Relaxed) == SIGNAL_CLEAR
        {
            self.consumer_cv.wait(&mut ring);
        }
        if self.signal.load(Ordering::Relaxed) != SIGNAL_CLEAR {
            return None;
        }
        let index = (ring.take_count & mask) as usize;
        let job = ring.entries[index];
        ring.take_count += 1;
        drop(ring);
        self.producer_cv.notify_one();
        Some(job)
    }

    /// Takes the oldest ready job, giving up after `timeout` if the queue
    /// stays empty.
    ///
    /// Returns `None` on timeout as well as on signal; callers that care
    /// about the difference check [`check_signal`](JobQueue::check_signal).
    /// Cooperative waiters use this so they can re-examine the job they are
    /// waiting on instead of parking indefinitely.
    pub fn take_timeout(&self, timeout: Duration) -> Option<JobId> {
        let deadline = Instant::now() + timeout;
        let mask = (JOB_SLOT_COUNT - 1) as u64;
        let mut ring = self.ring.lock();
        while ring.take_count == ring.push_count
            && self.signal.load(Ordering::Relaxed) == SIGNAL_CLEAR
        {
            if self
                .consumer_cv
                .wait_until(&mut ring, deadline)
                .timed_out()
            {
                break;
            }
        }
        if self.signal.load(Ordering::Relaxed) != SIGNAL_CLEAR {
            return None;
        }
        if ring.take_count == ring.push_count {
            return None; // timed out empty
        }
        let index = (ring.take_count & mask) as usize;
        let job = ring.entries[index];
        ring.take_count += 1;
        drop(ring);
        self.producer_cv.notify_one();
        Some(job)
    }

    /// Discards the queue contents and wakes all blocked producers.
    pub fn flush(&self) {
        let mut ring = self.ring.lock();
        ring.push_count = 0;
        ring.take_count = 0;
        drop(ring);
        self.producer_cv.notify_all();
    }

    /// Sets the signal word. Any non-zero value wakes every parked producer
    /// and consumer; the signal stays set until cleared with `SIGNAL_CLEAR`.
    pub fn signal(&self, code: u32) {
        let ring = self.ring.lock();
        self.signal.store(code, Ordering::Relaxed);
        drop(ring);
        if code != SIGNAL_CLEAR {
            self.consumer_cv.notify_all();
            self.producer_cv.notify_all();
        }
    }

    /// Re-enables parking on the queue.
    pub fn clear_signal(&self) {
        self.signal(SIGNAL_CLEAR);
    }

    /// Reads the signal word.
    pub fn check_signal(&self) -> u32 {
        self.signal.load(Ordering::Relaxed)
    }

    /// Number of entries currently enqueued.
    pub fn len(&self) -> usize {
        let ring = self.ring.lock();
        (ring.push_count - ring.take_count) as usize
    }

    /// Returns true if no entries are enqueued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
