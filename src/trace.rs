//! Chrome-tracing collector for job execution visibility.
//!
//! Disabled by default; call [`enable`] before spawning workers to record a
//! span for every Execute and Cleanup call into thread-local buffers, then
//! [`export_to_file`] to produce JSON loadable in chrome://tracing or
//! ui.perfetto.dev. Worker threads flush their buffers through a
//! [`CollectorGuard`] when they exit.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A recorded job span.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TraceEvent {
    /// Span name ("execute" or "cleanup").
    pub phase: &'static str,
    /// Slot index of the job the span belongs to.
    pub slot: usize,
    pub start_us: u64,
    pub duration_us: u64,
}

static ENABLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static TRACE_BUFFER: RefCell<Vec<TraceEvent>> = RefCell::new(Vec::new());
}

lazy_static::lazy_static! {
    static ref GLOBAL_START: Instant = Instant::now();
    static ref EPOCH_START_US: u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    static ref ALL_BUFFERS: Mutex<Vec<Vec<TraceEvent>>> = Mutex::new(Vec::new());
}

/// Turns span recording on.
pub fn enable() {
    // Touch the globals so the trace clock starts now, not mid-run.
    let _ = *GLOBAL_START;
    let _ = *EPOCH_START_US;
    ENABLED.store(true, Ordering::Relaxed);
}

/// Turns span recording off. Already-buffered events are kept.
pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed);
}

fn record_event(phase: &'static str, slot: usize, start: Instant, duration: std::time::Duration) {
    let start_us = (start.duration_since(*GLOBAL_START).as_micros() as u64) + *EPOCH_START_US;
    TRACE_BUFFER.with(|buf| {
        buf.borrow_mut().push(TraceEvent {
            phase,
            slot,
            start_us,
            duration_us: duration.as_micros() as u64,
        });
    });
}

/// Moves the calling thread's buffered events into the global list. Each
/// worker thread must call this (or drop a [`CollectorGuard`]) before the
/// trace is exported.
pub fn collect_local_trace() {
    TRACE_BUFFER.with(|buf| {
        let mut local = buf.borrow_mut();
        if !local.is_empty() {
            let mut global = ALL_BUFFERS.lock().unwrap();
            global.push(std::mem::take(&mut *local));
        }
    });
}

/// Writes every collected event as a Chrome Tracing JSON array.
pub fn export_to_file(path: &str) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let buffers = ALL_BUFFERS.lock().unwrap();

    writeln!(writer, "[")?;
    let mut first = true;
    for buffer in buffers.iter() {
        for event in buffer {
            if !first {
                writeln!(writer, ",")?;
            }
            first = false;
            // ph: X is a "Complete Event" (carries its duration); the slot
            // index doubles as the tid lane so a job's execute and cleanup
            // line up in the viewer.
            write!(
                writer,
                "{{\"name\":\"{}\",\"ph\":\"X\",\"ts\":{},\"dur\":{},\"pid\":1,\"tid\":{},\"args\":{{\"slot\":{}}}}}",
                event.phase, event.start_us, event.duration_us, event.slot, event.slot
            )?;
        }
    }
    writeln!(writer, "\n]")?;
    writer.flush()
}

/// RAII span: records from construction to drop.
pub struct TraceGuard {
    phase: &'static str,
    slot: usize,
    start: Option<Instant>,
}

impl TraceGuard {
    pub fn new(phase: &'static str, slot: usize) -> Self {
        let start = ENABLED.load(Ordering::Relaxed).then(Instant::now);
        Self { phase, slot, start }
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            record_event(self.phase, self.slot, start, start.elapsed());
        }
    }
}

/// RAII guard that flushes the thread's buffer when dropped; workers hold one
/// for the lifetime of their run loop.
pub struct CollectorGuard;

impl Drop for CollectorGuard {
    fn drop(&mut self) {
        collect_local_trace();
    }
}
