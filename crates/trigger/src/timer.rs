//! Recurring timer abstraction.
//!
//! The trigger arms one recurring job while a print is running. The concrete
//! scheduler lives elsewhere (`lapse-timer`); [`ManualTimer`] is an in-memory
//! stand-in whose ticks are fired by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::TimerError;

/// Identifier of the trigger's recurring capture job.
pub const TIMELAPSE_JOB_ID: &str = "timelapse_timer";

/// Callback run on every tick of a recurring job.
pub type TickCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Service that runs recurring jobs under string identifiers.
pub trait TimerService: Send + Sync {
    /// Run `tick` every `period` under `job_id`.
    ///
    /// Scheduling an id that already exists replaces the old job; jobs never
    /// stack.
    fn schedule_recurring(
        &self,
        job_id: &str,
        period: Duration,
        tick: TickCallback,
    ) -> Result<(), TimerError>;

    /// Remove the job. Returns true if it existed.
    fn cancel(&self, job_id: &str) -> bool;

    /// Check whether a job with this id is scheduled.
    fn exists(&self, job_id: &str) -> bool;
}

/// In-memory timer service for tests.
///
/// Records scheduled jobs and runs their callbacks only when
/// [`fire`](Self::fire) is called.
#[derive(Default)]
pub struct ManualTimer {
    jobs: Mutex<HashMap<String, (Duration, TickCallback)>>,
    stopped: AtomicBool,
    schedule_calls: Mutex<usize>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later `schedule_recurring` call with
    /// [`TimerError::SchedulerStopped`] and drop the current jobs.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.lock_jobs().clear();
    }

    /// Run the tick of `job_id` once. Returns false if no such job exists.
    pub fn fire(&self, job_id: &str) -> bool {
        // Clone out of the lock so the tick may reschedule.
        let tick = self.lock_jobs().get(job_id).map(|(_, tick)| Arc::clone(tick));
        match tick {
            Some(tick) => {
                tick();
                true
            }
            None => false,
        }
    }

    /// Period the job was scheduled with.
    pub fn period(&self, job_id: &str) -> Option<Duration> {
        self.lock_jobs().get(job_id).map(|(period, _)| *period)
    }

    /// Number of scheduled jobs.
    pub fn len(&self) -> usize {
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    /// Total `schedule_recurring` calls accepted, including replacements.
    pub fn schedule_calls(&self) -> usize {
        *self
            .schedule_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Duration, TickCallback)>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerService for ManualTimer {
    fn schedule_recurring(
        &self,
        job_id: &str,
        period: Duration,
        tick: TickCallback,
    ) -> Result<(), TimerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TimerError::SchedulerStopped);
        }
        if period.is_zero() {
            return Err(TimerError::InvalidPeriod {
                job_id: job_id.to_string(),
            });
        }

        self.lock_jobs().insert(job_id.to_string(), (period, tick));
        *self
            .schedule_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        self.lock_jobs().remove(job_id).is_some()
    }

    fn exists(&self, job_id: &str) -> bool {
        self.lock_jobs().contains_key(job_id)
    }
}
