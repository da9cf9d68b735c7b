//! Tokio-backed scheduler for recurring time-lapse jobs.
//!
//! Implements [`TimerService`] for the trigger. Each job is a task on the
//! runtime that ticks on an interval until its [`CancellationToken`] fires.
//!
//! # Example
//!
//! ```ignore
//! use lapse_timer::IntervalScheduler;
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(IntervalScheduler::current()?);
//! let trigger = LapseTrigger::new(&settings, printer, camera, scheduler.clone());
//! trigger.set_running(true)?;
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lapse_trigger::{TickCallback, TimerError, TimerService};
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs recurring jobs on a tokio runtime, keyed by job id.
///
/// The first tick of a job fires one full period after it is scheduled.
/// Ticks missed while the runtime was busy are skipped, not replayed.
pub struct IntervalScheduler {
    runtime: Handle,
    jobs: Mutex<HashMap<String, CancellationToken>>,
    /// Parent of every job token; cancelled on shutdown.
    root: CancellationToken,
}

impl IntervalScheduler {
    /// Create a scheduler that spawns jobs on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            jobs: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Create a scheduler on the runtime of the calling context.
    pub fn current() -> Result<Self, TimerError> {
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        Ok(Self::new(runtime))
    }

    /// Ids of all scheduled jobs, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every job and refuse new ones.
    pub fn shutdown(&self) {
        if self.root.is_cancelled() {
            return;
        }
        self.root.cancel();
        let cancelled = {
            let mut jobs = self.lock_jobs();
            let count = jobs.len();
            jobs.clear();
            count
        };
        tracing::info!(cancelled, "Interval scheduler shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerService for IntervalScheduler {
    fn schedule_recurring(
        &self,
        job_id: &str,
        period: Duration,
        tick: TickCallback,
    ) -> Result<(), TimerError> {
        if self.is_shutdown() {
            return Err(TimerError::SchedulerStopped);
        }
        if period.is_zero() {
            return Err(TimerError::InvalidPeriod {
                job_id: job_id.to_string(),
            });
        }

        let token = self.root.child_token();
        if let Some(previous) = self.lock_jobs().insert(job_id.to_string(), token.clone()) {
            previous.cancel();
            tracing::debug!(job_id, "Replaced existing recurring job");
        }

        self.runtime
            .spawn(run_job(job_id.to_string(), period, tick, token));
        tracing::debug!(job_id, period = ?period, "Recurring job scheduled");
        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        match self.lock_jobs().remove(job_id) {
            Some(token) => {
                token.cancel();
                tracing::debug!(job_id, "Recurring job cancelled");
                true
            }
            None => false,
        }
    }

    fn exists(&self, job_id: &str) -> bool {
        self.lock_jobs().contains_key(job_id)
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_job(job_id: String, period: Duration, tick: TickCallback, token: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        if panic::catch_unwind(AssertUnwindSafe(|| tick())).is_err() {
            tracing::warn!(job_id = %job_id, "Recurring job tick panicked");
        }
    }

    tracing::trace!(job_id = %job_id, "Recurring job stopped");
}
