//! Cancellation semantics: canceled-before-run jobs receive only Cleanup,
//! their dependents are not blocked, cancel is idempotent, and stale
//! identifiers are reported as such.

use jobslab::{
    JobCall, JobContext, JobDescriptor, JobQueue, JobScheduler, JobState, SubmitKind, SubmitResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Probe {
    executes: AtomicUsize,
    cleanups: AtomicUsize,
}

fn probe_entry(_ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    let probe = unsafe { &*(job.user1 as *const Probe) };
    match call {
        JobCall::Execute => probe.executes.fetch_add(1, Ordering::SeqCst),
        JobCall::Cleanup => probe.cleanups.fetch_add(1, Ordering::SeqCst),
    };
    0
}

fn self_cancel_entry(ctx: &mut JobContext, job: &JobDescriptor, call: JobCall) -> i32 {
    match call {
        // A running job cannot be canceled; report the state cancel saw.
        JobCall::Execute => ctx.cancel_job(job.id()) as i32,
        JobCall::Cleanup => 0,
    }
}

#[test]
fn canceled_job_does_not_block_dependents() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(1).expect("scheduler");
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");
    let canceled_probe = Arc::new(Probe::default());
    let dependent_probe = Arc::new(Probe::default());

    let job = ctx.create_job(0, 1).expect("job slot");
    job.entry = Some(probe_entry);
    job.user1 = Arc::as_ptr(&canceled_probe) as usize;
    let canceled_id = job.id();
    assert_eq!(
        ctx.submit_job(canceled_id, &[], SubmitKind::Run),
        SubmitResult::Success
    );

    // Cancel before any worker dequeues it.
    assert_eq!(ctx.cancel_job(canceled_id), JobState::Canceled);

    let job = ctx.create_job(0, 1).expect("job slot");
    job.entry = Some(probe_entry);
    job.user1 = Arc::as_ptr(&dependent_probe) as usize;
    let dependent_id = job.id();
    assert_eq!(
        ctx.submit_job(dependent_id, &[canceled_id], SubmitKind::Run),
        SubmitResult::Success
    );

    // Draining the queue observes the canceled job, completes it as
    // housekeeping, and thereby unblocks the dependent.
    assert!(ctx.wait_job(dependent_id));

    assert_eq!(canceled_probe.executes.load(Ordering::SeqCst), 0);
    assert_eq!(canceled_probe.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(dependent_probe.executes.load(Ordering::SeqCst), 1);
    assert_eq!(dependent_probe.cleanups.load(Ordering::SeqCst), 1);
    sched.release_context(ctx);
}

#[test]
fn cancel_is_idempotent_and_running_jobs_finish() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(1).expect("scheduler");
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");

    let job = ctx.create_job(0, 1).expect("job slot");
    let id = job.id();
    assert_eq!(ctx.submit_job(id, &[], SubmitKind::Run), SubmitResult::Success);
    assert_eq!(sched.cancel(id), JobState::Canceled);
    assert_eq!(sched.cancel(id), JobState::Canceled);
    assert_eq!(sched.cancel(id), JobState::Canceled);

    // A job that cancels itself while running observes `Running`.
    let job = ctx.create_job(0, 1).expect("job slot");
    job.entry = Some(self_cancel_entry);
    let running_id = job.id();
    assert_eq!(
        ctx.submit_job(running_id, &[], SubmitKind::Run),
        SubmitResult::Success
    );
    // Drain: first the canceled job's housekeeping, then the self-canceler.
    let taken = ctx.wait_ready_job().expect("ready job");
    assert_eq!(taken, running_id);
    assert_eq!(ctx.execute_job(taken), JobState::Running as i32);
    sched.release_context(ctx);
}

#[test]
fn stale_ids_resolve_to_nothing() {
    let queue = JobQueue::new(0);
    let sched = JobScheduler::create(1).expect("scheduler");
    let mut ctx = JobScheduler::acquire_context(&sched, &queue, std::thread::current().id())
        .expect("context");

    let job = ctx.create_job(0, 1).expect("job slot");
    let id = job.id();
    assert_eq!(ctx.submit_job(id, &[], SubmitKind::Run), SubmitResult::Success);
    assert!(sched.resolve(id).is_some());
    assert!(ctx.wait_job(id));

    // Completion retires the generation: the id neither resolves nor
    // cancels, and the slot's next occupant is untouched.
    assert!(sched.resolve(id).is_none());
    assert_eq!(sched.cancel(id), JobState::Uninitialized);
    assert_eq!(ctx.cancel_job(jobslab::JobId::INVALID), JobState::Uninitialized);
    sched.release_context(ctx);
}
