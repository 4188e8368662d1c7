//! Termination: signaling releases every parked worker within bounded time,
//! and cooperative waits report the signal instead of spinning.

use jobslab::{JobQueue, JobScheduler, SubmitKind, SubmitResult, WorkerPool, SIGNAL_TERMINATE};
use std::thread;
use std::time::Duration;

#[test]
fn terminate_releases_parked_workers() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(4).expect("scheduler");
    let pool = WorkerPool::new(sched.clone(), queue.clone(), 4);

    // Give the workers time to park in `take`.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sched.worker_count(0), 4);

    // shutdown() terminates the scheduler's queues and joins; a stuck
    // worker would hang the test.
    pool.shutdown().expect("worker panicked");
    assert_eq!(queue.check_signal(), SIGNAL_TERMINATE);
    assert_eq!(sched.worker_count(0), 0);
}

#[test]
fn wait_job_observes_signal() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(1).expect("scheduler");
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");

    // A job gated behind a never-submitted dependency can never finish.
    let gate = ctx.create_job(0, 1).expect("job slot");
    let gate_id = gate.id();
    let job = ctx.create_job(0, 1).expect("job slot");
    let id = job.id();
    assert_eq!(
        ctx.submit_job(id, &[gate_id], SubmitKind::Run),
        SubmitResult::Success
    );

    queue.signal(SIGNAL_TERMINATE);
    assert!(!ctx.wait_job(id), "a signaled wait must give up");
    sched.release_context(ctx);
}

#[test]
fn terminate_reaches_every_registered_queue() {
    let queue_a = JobQueue::new(1);
    let queue_b = JobQueue::new(2);
    let sched = JobScheduler::create(2).expect("scheduler");
    let pool_a = WorkerPool::new(sched.clone(), queue_a.clone(), 2);
    let pool_b = WorkerPool::new(sched.clone(), queue_b.clone(), 2);

    thread::sleep(Duration::from_millis(50));
    sched.terminate();
    assert_eq!(queue_a.check_signal(), SIGNAL_TERMINATE);
    assert_eq!(queue_b.check_signal(), SIGNAL_TERMINATE);

    // Both pools re-signal on shutdown; the workers are already gone or
    // about to leave.
    pool_a.shutdown().expect("worker panicked");
    pool_b.shutdown().expect("worker panicked");
}
