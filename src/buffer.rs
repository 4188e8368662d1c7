//! Job buffer arena: fixed-size bump-allocation blocks that carry the waiter
//! lists and payloads of the jobs created from them.
//!
//! Each buffer owns a contiguous range of slot-table indices
//! (`slot_base .. slot_base + JOBS_PER_BUFFER`), so slots handed out from
//! different buffers can never collide. A buffer is kept alive by a reference
//! count: one reference for the owning context plus one per uncompleted job,
//! and it returns to the pool's free list only when the count reaches zero.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::{JOBS_PER_BUFFER, JOB_BUFFER_SIZE};

/// Base alignment of the backing block; covers any payload alignment a job
/// can reasonably request without extra padding on the first allocation.
const BLOCK_ALIGN: usize = 16;

/// A bump-allocated block backing the jobs of one context at a time.
pub(crate) struct JobBuffer {
    storage: NonNull<u8>,
    capacity: usize,
    /// Next free byte offset. Only the context that currently owns the buffer
    /// advances it; acquisition hands over exclusive write access.
    cursor: Cell<usize>,
    /// First slot-table index reserved for jobs allocated from this buffer.
    slot_base: u32,
    /// Position of this buffer in the pool's buffer array.
    index: u32,
    /// One reference for the owning context plus one per uncompleted job.
    refcount: AtomicU32,
}

// SAFETY: the cursor is only touched by the single context that owns the
// buffer (ownership is transferred through the pool mutex or a refcount
// drop to zero), and the raw block itself is only written through
// allocations handed out to that owner. The refcount is atomic.
unsafe impl Send for JobBuffer {}
unsafe impl Sync for JobBuffer {}

impl JobBuffer {
    /// Allocates the backing block for a new buffer.
    ///
    /// Returns `None` if the allocator cannot provide the block.
    fn new(index: u32) -> Option<Box<JobBuffer>> {
        let layout = Layout::from_size_align(JOB_BUFFER_SIZE, BLOCK_ALIGN).ok()?;
        let ptr = unsafe { alloc(layout) };
        Some(Box::new(JobBuffer {
            storage: NonNull::new(ptr)?,
            capacity: JOB_BUFFER_SIZE,
            cursor: Cell::new(0),
            slot_base: index * JOBS_PER_BUFFER as u32,
            index,
            refcount: AtomicU32::new(0),
        }))
    }

    /// Allocates `size` bytes at the requested alignment, advancing the
    /// cursor. Returns `None` when the aligned allocation would overflow the
    /// block; the caller then rolls the cursor back and acquires a fresh
    /// buffer.
    pub(crate) fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        let cursor = self.cursor.get();
        let base = unsafe { self.storage.as_ptr().add(cursor) };
        let pad = base.align_offset(align);
        let new_cursor = cursor.checked_add(pad)?.checked_add(size)?;
        if new_cursor <= self.capacity {
            self.cursor.set(new_cursor);
            NonNull::new(unsafe { base.add(pad) })
        } else {
            None
        }
    }

    /// Current cursor position, used to roll back a partial job allocation.
    pub(crate) fn mark(&self) -> usize {
        self.cursor.get()
    }

    /// Rolls the cursor back to a previously captured mark.
    pub(crate) fn rewind(&self, mark: usize) {
        debug_assert!(mark <= self.cursor.get());
        self.cursor.set(mark);
    }

    /// First slot-table index owned by this buffer.
    pub(crate) fn slot_base(&self) -> u32 {
        self.slot_base
    }

    /// Takes a reference on behalf of a newly created job.
    pub(crate) fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Resets the buffer for a new owner: empty cursor, one owner reference.
    fn reset(&self) {
        self.cursor.set(0);
        self.refcount.store(1, Ordering::SeqCst);
    }
}

impl Drop for JobBuffer {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, BLOCK_ALIGN).unwrap();
        unsafe { dealloc(self.storage.as_ptr(), layout) };
    }
}

/// Copyable handle to a pooled buffer.
///
/// Buffers are boxed and never deallocated before the pool itself drops, so
/// the pointer stays valid for the pool's lifetime.
#[derive(Clone, Copy)]
pub(crate) struct BufferRef(NonNull<JobBuffer>);

// SAFETY: see `JobBuffer`; the handle only exposes the operations that are
// safe under the ownership protocol.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

impl std::ops::Deref for BufferRef {
    type Target = JobBuffer;

    fn deref(&self) -> &JobBuffer {
        unsafe { self.0.as_ref() }
    }
}

struct PoolInner {
    /// Every buffer ever created, indexed by `JobBuffer::index`.
    all: Vec<Box<JobBuffer>>,
    /// Indices of buffers with no outstanding references.
    free: Vec<u32>,
}

/// Pool of job buffers with a hard bound of
/// `ceil(slot_count / JOBS_PER_BUFFER)` buffers, the point at which every
/// slot-table entry has backing storage.
pub(crate) struct BufferPool {
    inner: Mutex<PoolInner>,
    limit: usize,
}

impl BufferPool {
    pub(crate) fn new(limit: usize) -> BufferPool {
        BufferPool {
            inner: Mutex::new(PoolInner {
                all: Vec::new(),
                free: Vec::new(),
            }),
            limit,
        }
    }

    /// Creates `count` buffers up front and places them on the free list.
    pub(crate) fn preallocate(&self, count: usize) -> Option<()> {
        let mut pool = self.inner.lock();
        for _ in 0..count.min(self.limit) {
            let index = pool.all.len() as u32;
            pool.all.push(JobBuffer::new(index)?);
            pool.free.push(index);
        }
        Some(())
    }

    /// Acquires a buffer for a context, releasing `current` if one is held.
    ///
    /// If dropping the owner reference leaves `current` with no outstanding
    /// jobs it is reset and handed straight back; otherwise the free list is
    /// consulted, and failing that a new buffer is created. Exhausting the
    /// pool is an invariant violation (every slot already has backing
    /// storage) and reports `None` in release builds.
    pub(crate) fn acquire(&self, current: Option<BufferRef>) -> Option<BufferRef> {
        if let Some(cur) = current {
            if cur.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
                cur.reset();
                return Some(cur);
            }
        }
        let acquired = {
            let mut pool = self.inner.lock();
            let index = match pool.free.pop() {
                Some(index) => index,
                None if pool.all.len() < self.limit => {
                    let index = pool.all.len() as u32;
                    pool.all.push(JobBuffer::new(index)?);
                    index
                }
                None => {
                    debug_assert!(false, "job buffer pool exhausted");
                    return None;
                }
            };
            BufferRef(NonNull::from(&*pool.all[index as usize]))
        };
        acquired.reset();
        Some(acquired)
    }

    /// Drops one reference; a buffer with no references left returns to the
    /// free list.
    pub(crate) fn release(&self, buffer: BufferRef) {
        if buffer.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.lock().free.push(buffer.index);
        }
    }

    /// `(created, free)` buffer counts, for accounting checks.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let pool = self.inner.lock();
        (pool.all.len(), pool.free.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_alloc_alignment() {
        let pool = BufferPool::new(4);
        let buf = pool.acquire(None).unwrap();
        let a = buf.alloc(3, 1).unwrap();
        let b = buf.alloc(8, 8).unwrap();
        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3);
        pool.release(buf);
    }

    #[test]
    fn test_alloc_overflow_returns_none() {
        let pool = BufferPool::new(1);
        let buf = pool.acquire(None).unwrap();
        assert!(buf.alloc(JOB_BUFFER_SIZE + 1, 1).is_none());
        let mark = buf.mark();
        assert!(buf.alloc(JOB_BUFFER_SIZE, 1).is_some());
        assert!(buf.alloc(1, 1).is_none());
        buf.rewind(mark);
        assert!(buf.alloc(16, 1).is_some());
        pool.release(buf);
    }

    #[test]
    fn test_refcount_gates_free_list() {
        let pool = BufferPool::new(2);
        let buf = pool.acquire(None).unwrap();
        buf.add_ref(); // a live job
        pool.release(buf); // owner reference dropped
        assert_eq!(pool.counts(), (1, 0)); // job still holds it
        pool.release(buf); // job completes
        assert_eq!(pool.counts(), (1, 1));
    }

    #[test]
    fn test_acquire_reuses_drained_current() {
        let pool = BufferPool::new(2);
        let first = pool.acquire(None).unwrap();
        let base = first.slot_base();
        // No live jobs: dropping the owner reference recycles it in place.
        let second = pool.acquire(Some(first)).unwrap();
        assert_eq!(second.slot_base(), base);
        assert_eq!(pool.counts(), (1, 0));
        pool.release(second);
    }

    #[test]
    fn test_slot_bases_partition() {
        let pool = BufferPool::new(3);
        let a = pool.acquire(None).unwrap();
        a.add_ref(); // keep it busy so acquire must create another
        let b = pool.acquire(Some(a)).unwrap();
        assert_eq!(a.slot_base(), 0);
        assert_eq!(b.slot_base(), JOBS_PER_BUFFER as u32);
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_pool_limit_exhaustion() {
        let pool = BufferPool::new(1);
        let a = pool.acquire(None).unwrap();
        a.add_ref();
        // `a` still has a job reference, so it cannot be recycled and the
        // pool has no capacity left.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.acquire(Some(a))
        }));
        match result {
            Ok(next) => assert!(next.is_none()), // release build
            Err(_) => {}                         // debug assertion fired
        }
    }
}
