//! Collaborator traits for the camera and the printer.
//!
//! The trigger only needs "take a frame", "clean up frames" and "is a job
//! loaded?". Keeping these behind traits lets the decision logic stay pure
//! and testable without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sink that turns a capture request into a stored frame.
///
/// Captures run on the capture pool, possibly several at once. Implementations
/// must serialize their own writes or pick distinct filenames, and should log
/// their own failures rather than panic.
pub trait CaptureSink: Send + Sync {
    /// Take and store one time-lapse frame.
    fn capture(&self);

    /// Delete the frames accumulated for the finished job.
    fn cleanup(&self);
}

/// Source of the printer's job state.
pub trait PrintStatusSource: Send + Sync {
    /// Filename of the job currently loaded or printing, if any.
    fn current_job_filename(&self) -> Option<String>;
}

/// Capture sink that drops every request.
pub struct NullCaptureSink;

impl CaptureSink for NullCaptureSink {
    fn capture(&self) {}

    fn cleanup(&self) {}
}

/// Print status with a job filename set by hand.
///
/// Useful for tests and for hosts that track the job themselves.
#[derive(Debug, Default)]
pub struct StaticPrintStatus {
    filename: Mutex<Option<String>>,
}

impl StaticPrintStatus {
    /// Status with no job loaded.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Status with `filename` loaded.
    pub fn printing(filename: impl Into<String>) -> Self {
        Self {
            filename: Mutex::new(Some(filename.into())),
        }
    }

    /// Replace the loaded job (`None` unloads it).
    pub fn set_job(&self, filename: Option<String>) {
        *self.filename.lock().unwrap_or_else(PoisonError::into_inner) = filename;
    }
}

impl PrintStatusSource for StaticPrintStatus {
    fn current_job_filename(&self) -> Option<String> {
        self.filename
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Capture sink that counts requests.
///
/// Captures arrive from pool threads, so tests wait on
/// [`wait_for_captures`](Self::wait_for_captures) instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingCaptureSink {
    captures: Mutex<usize>,
    arrived: Condvar,
    cleanups: AtomicUsize,
}

impl RecordingCaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captures taken so far.
    pub fn captures(&self) -> usize {
        *self.captures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cleanup requests received.
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Block until at least `count` captures arrived or `timeout` elapsed.
    ///
    /// Returns true if the count was reached.
    pub fn wait_for_captures(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut taken = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
        while *taken < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            taken = match self.arrived.wait_timeout(taken, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl CaptureSink for RecordingCaptureSink {
    fn capture(&self) {
        let mut taken = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
        *taken += 1;
        self.arrived.notify_all();
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
