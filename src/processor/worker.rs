//! Processor Worker Thread
//!
//! One polling thread runs per started processor. The thread repeatedly asks
//! the processor logic for one polling step; the step blocks on the input
//! sensor's own readiness wait, so the loop paces itself at the programmed
//! hardware interval.
//!
//! # Cancellation
//!
//! The worker owns a running flag shared with its thread. [`ProcessorWorker::stop`]
//! clears the flag and joins the thread, so a STOP returns only after the
//! loop has observed the signal and exited.
//!
//! # Idle backoff
//!
//! A step that reports no sample (the sensor was not ready) is followed by a
//! short sleep so a sensor without a blocking wait cannot spin the CPU.

use super::Processor;
use crate::error::{Result, SensordError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Sleep after a polling step that produced nothing
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Counters shared between a worker and its thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    polls: AtomicU64,
    idle_polls: AtomicU64,
    events: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn record_poll(&self, produced: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if !produced {
            self.idle_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_events(&self, count: u64) {
        self.events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    /// Polling steps executed
    pub polls: u64,
    /// Steps that found no sample
    pub idle_polls: u64,
    /// Events pushed to the queue
    pub events: u64,
}

/// Handle to a running polling thread
pub struct ProcessorWorker {
    /// Running flag
    running: Arc<AtomicBool>,
    /// Thread handle, taken on stop
    handle: Option<JoinHandle<()>>,
    /// Statistics
    stats: Arc<WorkerStats>,
    /// When polling started
    started_at: Instant,
}

impl ProcessorWorker {
    /// Spawn the polling thread for `processor`
    pub fn spawn(processor: Arc<Processor>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::default());

        let thread_running = running.clone();
        let thread_stats = stats.clone();
        let handle = std::thread::Builder::new()
            .name(format!("proc-{}", processor.name()))
            .spawn(move || run(processor, thread_running, thread_stats))
            .map_err(|e| SensordError::Hardware(format!("Failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            running,
            handle: Some(handle),
            stats,
            started_at: Instant::now(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) -> WorkerStatsSnapshot {
        self.join();
        let stats = self.stats.snapshot();
        tracing::debug!(
            "Worker stopped after {:?}: {} polls ({} idle), {} events",
            self.started_at.elapsed(),
            stats.polls,
            stats.idle_polls,
            stats.events
        );
        stats
    }

    fn join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Processor worker thread panicked");
            }
        }
    }
}

impl Drop for ProcessorWorker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Main polling loop
fn run(processor: Arc<Processor>, running: Arc<AtomicBool>, stats: Arc<WorkerStats>) {
    tracing::info!("Processor {} worker started", processor.name());

    while running.load(Ordering::SeqCst) {
        let (produced, events) = processor.poll_once();
        stats.record_poll(produced);
        stats.record_events(events);

        if !produced && running.load(Ordering::SeqCst) {
            std::thread::sleep(IDLE_BACKOFF);
        }
    }

    tracing::info!("Processor {} worker stopped", processor.name());
}
