//! Fan-out/fan-in: a parent spawns eight children and a barrier depending on
//! all of them; the barrier must observe every child, and the parent's
//! cleanup must not run before its whole subtree has completed.

use jobslab::{
    JobCall, JobContext, JobDescriptor, JobQueue, JobScheduler, SubmitKind, SubmitResult,
    WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CHILDREN: usize = 8;

#[derive(Default)]
struct FanState {
    children_executed: AtomicUsize,
    children_at_barrier: AtomicUsize,
    barrier_executed: AtomicUsize,
    subtree_at_parent_cleanup: AtomicUsize,
    cleanups: AtomicUsize,
    submit_failures: AtomicUsize,
}

fn state_of(job: &JobDescriptor) -> &'static FanState {
    unsafe { &*(job.user1 as *const FanState) }
}

fn child_entry(_ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    let state = state_of(job);
    match call {
        JobCall::Execute => {
            state.children_executed.fetch_add(1, Ordering::SeqCst);
        }
        JobCall::Cleanup => {
            state.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
    0
}

fn barrier_entry(_ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    let state = state_of(job);
    match call {
        JobCall::Execute => {
            state
                .children_at_barrier
                .store(state.children_executed.load(Ordering::SeqCst), Ordering::SeqCst);
            state.barrier_executed.fetch_add(1, Ordering::SeqCst);
        }
        JobCall::Cleanup => {
            state.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
    0
}

fn parent_entry(ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    let state = state_of(job);
    match call {
        JobCall::Execute => {
            let parent_id = job.id();
            let mut child_ids = Vec::with_capacity(CHILDREN);
            for _ in 0..CHILDREN {
                let Some(child) = ctx.create_job(0, 1) else {
                    state.submit_failures.fetch_add(1, Ordering::SeqCst);
                    return -1;
                };
                child.entry = Some(child_entry);
                child.user1 = job.user1;
                child.parent = parent_id;
                let child_id = child.id();
                if ctx.submit_job(child_id, &[], SubmitKind::Run) != SubmitResult::Success {
                    state.submit_failures.fetch_add(1, Ordering::SeqCst);
                }
                child_ids.push(child_id);
            }
            let Some(barrier) = ctx.create_job(0, 1) else {
                state.submit_failures.fetch_add(1, Ordering::SeqCst);
                return -1;
            };
            barrier.entry = Some(barrier_entry);
            barrier.user1 = job.user1;
            barrier.parent = parent_id;
            let barrier_id = barrier.id();
            if ctx.submit_job(barrier_id, &child_ids, SubmitKind::Run) != SubmitResult::Success {
                state.submit_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
        JobCall::Cleanup => {
            let subtree = state.children_executed.load(Ordering::SeqCst)
                + state.barrier_executed.load(Ordering::SeqCst);
            state
                .subtree_at_parent_cleanup
                .store(subtree, Ordering::SeqCst);
            state.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
    0
}

#[test]
fn parent_cleanup_waits_for_children_and_barrier() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(4).expect("scheduler");
    let pool = WorkerPool::new(sched.clone(), queue.clone(), 2);
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");
    let state = Arc::new(FanState::default());

    let parent = ctx.create_job(0, 1).expect("job slot");
    parent.entry = Some(parent_entry);
    parent.user1 = Arc::as_ptr(&state) as usize;
    let parent_id = parent.id();
    assert_eq!(
        ctx.submit_job(parent_id, &[], SubmitKind::Run),
        SubmitResult::Success
    );

    assert!(ctx.wait_job(parent_id));
    sched.release_context(ctx);
    pool.shutdown().expect("worker panicked");

    assert_eq!(state.submit_failures.load(Ordering::SeqCst), 0);
    assert_eq!(state.children_executed.load(Ordering::SeqCst), CHILDREN);
    assert_eq!(state.barrier_executed.load(Ordering::SeqCst), 1);
    // Every child had executed by the time the barrier ran.
    assert_eq!(state.children_at_barrier.load(Ordering::SeqCst), CHILDREN);
    // The parent's cleanup observed the complete subtree.
    assert_eq!(
        state.subtree_at_parent_cleanup.load(Ordering::SeqCst),
        CHILDREN + 1
    );
    // Children, barrier and parent each got exactly one cleanup.
    assert_eq!(state.cleanups.load(Ordering::SeqCst), CHILDREN + 2);
}
