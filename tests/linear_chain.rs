//! A three-job dependency chain on a single-worker queue must execute in
//! dependency order, each job receiving Execute then Cleanup exactly once.

use jobslab::{
    JobCall, JobContext, JobDescriptor, JobId, JobQueue, JobScheduler, SubmitKind, SubmitResult,
    WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ChainLog {
    executes: Mutex<Vec<usize>>,
    cleanups: AtomicUsize,
}

fn chain_entry(_ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    let log = unsafe { &*(job.user1 as *const ChainLog) };
    match call {
        JobCall::Execute => log.executes.lock().unwrap().push(job.user2),
        JobCall::Cleanup => {
            log.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
    0
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(2).expect("scheduler");
    let pool = WorkerPool::new(sched.clone(), queue.clone(), 1);
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");
    let log = Arc::new(ChainLog::default());

    let mut ids: Vec<JobId> = Vec::new();
    for step in 1..=3usize {
        let job = ctx.create_job(0, 1).expect("job slot");
        job.entry = Some(chain_entry);
        job.user1 = Arc::as_ptr(&log) as usize;
        job.user2 = step;
        let id = job.id();
        let deps: Vec<JobId> = ids.last().copied().into_iter().collect();
        assert_eq!(
            ctx.submit_job(id, &deps, SubmitKind::Run),
            SubmitResult::Success
        );
        ids.push(id);
    }

    assert!(ctx.wait_job(*ids.last().unwrap()));
    sched.release_context(ctx);
    pool.shutdown().expect("worker panicked");

    assert_eq!(*log.executes.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(log.cleanups.load(Ordering::SeqCst), 3);
    for id in ids {
        assert!(sched.resolve(id).is_none(), "completed id must not resolve");
    }
}
