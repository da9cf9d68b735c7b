//! The time-lapse trigger: guards, height tracking and timer arming.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;

use crate::decision::{decide, Decision, PositionSample};
use crate::dispatch::CapturePool;
use crate::error::TimerError;
use crate::provider::{CaptureSink, PrintStatusSource};
use crate::settings::LapseSettings;
use crate::timer::{TickCallback, TimerService, TIMELAPSE_JOB_ID};

/// Why an evaluation was skipped before any decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Disabled,
    NoJobLoaded,
    NotRunning,
}

/// Result of one [`LapseTrigger::evaluate`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationOutcome {
    /// A guard short-circuited the call.
    Rejected(RejectReason),
    /// Height tracking restarted at `height`; nothing captured.
    Reset { height: f64 },
    /// A capture was dispatched. `height` is set for height-triggered captures.
    Captured { height: Option<f64> },
    /// Guards passed but nothing matched.
    Idle,
}

impl EvaluationOutcome {
    pub fn is_capture(&self) -> bool {
        matches!(self, EvaluationOutcome::Captured { .. })
    }
}

impl From<Decision> for EvaluationOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Reset { height } => EvaluationOutcome::Reset { height },
            Decision::Capture { height } => EvaluationOutcome::Captured { height },
            Decision::Idle => EvaluationOutcome::Idle,
        }
    }
}

/// Serializable snapshot of the trigger, for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapseStatus {
    pub enabled: bool,
    pub manual_mode: bool,
    pub running: bool,
    pub height_threshold_mm: f64,
    pub last_trigger_height_mm: f64,
    pub interval_seconds: i64,
}

struct TriggerState {
    running: bool,
    last_trigger_height: f64,
    interval_seconds: i64,
}

/// Decides when to capture time-lapse frames during a print.
///
/// Position updates and timer ticks both go through [`evaluate`](Self::evaluate).
/// Captures run on an internal [`CapturePool`] so callers never wait on the
/// camera. While running with a positive interval, a recurring job named
/// [`TIMELAPSE_JOB_ID`] is kept in the timer service.
///
/// Built with [`LapseTrigger::new`], which returns an `Arc`: the timer job
/// holds only a weak reference back to the trigger.
pub struct LapseTrigger {
    enabled: bool,
    manual_mode: bool,
    height_threshold: f64,
    state: Mutex<TriggerState>,
    /// Held across a `running`/interval write and the matching timer call,
    /// so concurrent arm/disarm requests apply in one order.
    arming: Mutex<()>,
    print_status: Arc<dyn PrintStatusSource>,
    camera: Arc<dyn CaptureSink>,
    timer: Arc<dyn TimerService>,
    pool: CapturePool,
    this: Weak<LapseTrigger>,
}

impl LapseTrigger {
    pub fn new(
        settings: &LapseSettings,
        print_status: Arc<dyn PrintStatusSource>,
        camera: Arc<dyn CaptureSink>,
        timer: Arc<dyn TimerService>,
    ) -> Arc<Self> {
        tracing::info!(
            enabled = settings.enabled,
            manual_mode = settings.manual_mode,
            height_threshold_mm = settings.height_threshold_mm,
            interval_seconds = settings.interval_seconds,
            "Time-lapse trigger created"
        );

        Arc::new_cyclic(|this| Self {
            enabled: settings.enabled,
            manual_mode: settings.manual_mode,
            height_threshold: settings.height_threshold_mm,
            state: Mutex::new(TriggerState {
                running: false,
                last_trigger_height: 0.0,
                interval_seconds: settings.interval_seconds,
            }),
            arming: Mutex::new(()),
            print_status,
            camera,
            timer,
            pool: CapturePool::new(settings.capture_workers),
            this: this.clone(),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn manual_mode(&self) -> bool {
        self.manual_mode
    }

    pub fn running(&self) -> bool {
        self.state().running
    }

    pub fn height_threshold(&self) -> f64 {
        self.height_threshold
    }

    pub fn last_trigger_height(&self) -> f64 {
        self.state().last_trigger_height
    }

    pub fn interval_seconds(&self) -> i64 {
        self.state().interval_seconds
    }

    /// Change the timer period.
    ///
    /// While running, the job is rescheduled at the new period, or cancelled
    /// when `seconds <= 0`. A failed reschedule leaves the trigger stopped.
    pub fn set_interval_seconds(&self, seconds: i64) -> Result<(), TimerError> {
        let _arming = self.arming.lock().unwrap_or_else(PoisonError::into_inner);
        let running = {
            let mut state = self.state();
            state.interval_seconds = seconds;
            state.running
        };

        if running {
            self.arm_or_stop(seconds)?;
        }
        Ok(())
    }

    /// Forget the last trigger height, so the next job starts tracking at zero.
    pub fn reset_height_tracking(&self) {
        self.state().last_trigger_height = 0.0;
    }

    pub fn status(&self) -> LapseStatus {
        let state = self.state();
        LapseStatus {
            enabled: self.enabled,
            manual_mode: self.manual_mode,
            running: state.running,
            height_threshold_mm: self.height_threshold,
            last_trigger_height_mm: state.last_trigger_height,
            interval_seconds: state.interval_seconds,
        }
    }

    /// Arm (`true`) or disarm (`false`) the time-lapse.
    ///
    /// Always re-runs the arm/disarm step, so repeating a value is harmless.
    /// Timer errors are returned as-is; a failed arm leaves the trigger
    /// stopped.
    pub fn set_running(&self, running: bool) -> Result<(), TimerError> {
        let _arming = self.arming.lock().unwrap_or_else(PoisonError::into_inner);
        let interval_seconds = {
            let mut state = self.state();
            state.running = running;
            state.interval_seconds
        };

        if !running {
            self.disarm();
            return Ok(());
        }

        self.arm_or_stop(interval_seconds)
    }

    /// Decide whether `sample` warrants a capture, and dispatch it if so.
    pub fn evaluate(&self, sample: PositionSample) -> EvaluationOutcome {
        if !self.enabled {
            tracing::debug!("Time-lapse is disabled");
            return EvaluationOutcome::Rejected(RejectReason::Disabled);
        }
        if self.print_status.current_job_filename().is_none() {
            tracing::debug!("Time-lapse inactive: no print job loaded");
            return EvaluationOutcome::Rejected(RejectReason::NoJobLoaded);
        }

        let decision = {
            let mut state = self.state();
            if !state.running {
                tracing::debug!("Time-lapse is not running");
                return EvaluationOutcome::Rejected(RejectReason::NotRunning);
            }

            let decision = decide(sample, self.height_threshold, state.last_trigger_height);
            match decision {
                Decision::Reset { height }
                | Decision::Capture {
                    height: Some(height),
                } => state.last_trigger_height = height,
                _ => {}
            }
            decision
        };

        match decision {
            Decision::Reset { height } => {
                tracing::debug!(height, "Head dropped below last trigger height, tracking reset");
            }
            Decision::Capture { height } => {
                tracing::debug!(height = ?height, "Dispatching time-lapse capture");
                self.dispatch_capture();
            }
            Decision::Idle => {}
        }

        decision.into()
    }

    /// Capture a frame now, regardless of position. Guards still apply.
    pub fn capture_now(&self) -> EvaluationOutcome {
        self.evaluate(PositionSample::Unknown)
    }

    /// Remove the frames accumulated for the finished job.
    ///
    /// Local state is left untouched; see
    /// [`reset_height_tracking`](Self::reset_height_tracking).
    pub fn clean(&self) {
        self.camera.cleanup();
    }

    fn dispatch_capture(&self) {
        let camera = Arc::clone(&self.camera);
        self.pool.submit(move || camera.capture());
    }

    /// Caller holds `arming`.
    fn arm_or_stop(&self, interval_seconds: i64) -> Result<(), TimerError> {
        if let Err(e) = self.arm(interval_seconds) {
            tracing::warn!("Failed to arm time-lapse timer: {}", e);
            self.state().running = false;
            self.disarm();
            return Err(e);
        }
        Ok(())
    }

    fn arm(&self, interval_seconds: i64) -> Result<(), TimerError> {
        if interval_seconds <= 0 {
            tracing::debug!("Timer interval disabled, not scheduling time-lapse timer");
            self.disarm();
            return Ok(());
        }

        let trigger = self.this.clone();
        let tick: TickCallback = Arc::new(move || {
            if let Some(trigger) = trigger.upgrade() {
                trigger.evaluate(PositionSample::Unknown);
            }
        });

        let period = Duration::from_secs(interval_seconds.unsigned_abs());
        self.timer.schedule_recurring(TIMELAPSE_JOB_ID, period, tick)?;
        tracing::info!(interval_seconds, "Time-lapse timer armed");
        Ok(())
    }

    fn disarm(&self) {
        if self.timer.exists(TIMELAPSE_JOB_ID) {
            self.timer.cancel(TIMELAPSE_JOB_ID);
            tracing::info!("Time-lapse timer disarmed");
        }
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LapseTrigger {
    fn drop(&mut self) {
        let running = self
            .state
            .get_mut()
            .map(|state| state.running)
            .unwrap_or_else(|poisoned| poisoned.into_inner().running);
        if running {
            self.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{RecordingCaptureSink, StaticPrintStatus};
    use crate::timer::ManualTimer;

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        trigger: Arc<LapseTrigger>,
        camera: Arc<RecordingCaptureSink>,
        status: Arc<StaticPrintStatus>,
        timer: Arc<ManualTimer>,
    }

    impl Fixture {
        /// Change the stored interval without touching the timer.
        fn force_interval(&self, seconds: i64) {
            self.trigger.state().interval_seconds = seconds;
        }
    }

    fn fixture(settings: LapseSettings) -> Fixture {
        let camera = Arc::new(RecordingCaptureSink::new());
        let status = Arc::new(StaticPrintStatus::printing("benchy.gcode"));
        let timer = Arc::new(ManualTimer::new());
        let trigger = LapseTrigger::new(
            &settings,
            status.clone(),
            camera.clone(),
            timer.clone(),
        );
        Fixture {
            trigger,
            camera,
            status,
            timer,
        }
    }

    /// Timer that parks the first `schedule_recurring` call until released.
    struct GatedTimer {
        inner: ManualTimer,
        entered: crossbeam_channel::Receiver<()>,
        entered_tx: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Sender<()>,
        release_rx: crossbeam_channel::Receiver<()>,
    }

    impl GatedTimer {
        fn new() -> Self {
            let (entered_tx, entered) = crossbeam_channel::bounded(1);
            let (release, release_rx) = crossbeam_channel::bounded(1);
            Self {
                inner: ManualTimer::new(),
                entered,
                entered_tx,
                release,
                release_rx,
            }
        }
    }

    impl TimerService for GatedTimer {
        fn schedule_recurring(
            &self,
            job_id: &str,
            period: Duration,
            tick: TickCallback,
        ) -> Result<(), TimerError> {
            let _ = self.entered_tx.try_send(());
            let _ = self.release_rx.recv_timeout(WAIT);
            self.inner.schedule_recurring(job_id, period, tick)
        }

        fn cancel(&self, job_id: &str) -> bool {
            self.inner.cancel(job_id)
        }

        fn exists(&self, job_id: &str) -> bool {
            self.inner.exists(job_id)
        }
    }

    fn height_settings(threshold: f64) -> LapseSettings {
        LapseSettings {
            enabled: true,
            height_threshold_mm: threshold,
            ..Default::default()
        }
    }

    fn running_fixture(settings: LapseSettings) -> Fixture {
        let fx = fixture(settings);
        fx.trigger.set_running(true).unwrap();
        fx
    }

    #[test]
    fn test_accessors_reflect_settings() {
        let fx = fixture(LapseSettings {
            enabled: true,
            manual_mode: true,
            height_threshold_mm: 0.3,
            interval_seconds: 15,
            capture_workers: 2,
        });

        assert!(fx.trigger.enabled());
        assert!(fx.trigger.manual_mode());
        assert!(!fx.trigger.running());
        assert_eq!(fx.trigger.height_threshold(), 0.3);
        assert_eq!(fx.trigger.interval_seconds(), 15);
        assert_eq!(fx.trigger.last_trigger_height(), 0.0);
    }

    #[test]
    fn test_layer_sequence_captures_once_per_height() {
        let fx = running_fixture(height_settings(0.2));

        let outcomes: Vec<_> = [0.2, 0.4, 0.4, 0.6]
            .into_iter()
            .map(|z| fx.trigger.evaluate(PositionSample::Known(z)))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                EvaluationOutcome::Captured { height: Some(0.2) },
                EvaluationOutcome::Captured { height: Some(0.4) },
                EvaluationOutcome::Idle,
                EvaluationOutcome::Captured { height: Some(0.6) },
            ]
        );
        assert!(fx.camera.wait_for_captures(3, WAIT));
        assert_eq!(fx.trigger.last_trigger_height(), 0.6);
    }

    #[test]
    fn test_unknown_sample_captures_without_moving_height() {
        let fx = running_fixture(height_settings(0.2));
        fx.trigger.evaluate(PositionSample::Known(1.0));

        let outcome = fx.trigger.evaluate(PositionSample::Unknown);

        assert_eq!(outcome, EvaluationOutcome::Captured { height: None });
        assert!(fx.camera.wait_for_captures(2, WAIT));
        assert_eq!(fx.trigger.last_trigger_height(), 1.0);
    }

    #[test]
    fn test_retraction_resets_without_capture() {
        let fx = running_fixture(height_settings(0.2));
        fx.trigger.evaluate(PositionSample::Known(5.0));
        assert!(fx.camera.wait_for_captures(1, WAIT));

        let outcome = fx.trigger.evaluate(PositionSample::Known(0.4));

        assert_eq!(outcome, EvaluationOutcome::Reset { height: 0.4 });
        assert_eq!(fx.trigger.last_trigger_height(), 0.4);

        // Tracking continues from the reset height.
        assert!(fx.trigger.evaluate(PositionSample::Known(0.6)).is_capture());
        assert!(fx.camera.wait_for_captures(2, WAIT));
    }

    #[test]
    fn test_zero_threshold_only_unknown_captures() {
        let fx = running_fixture(height_settings(0.0));

        for z in [0.2, 0.4, 0.6, 0.8] {
            assert!(!fx.trigger.evaluate(PositionSample::Known(z)).is_capture());
        }
        assert!(fx.trigger.evaluate(PositionSample::Unknown).is_capture());
        assert!(fx.camera.wait_for_captures(1, WAIT));
    }

    #[test]
    fn test_disabled_never_captures() {
        let fx = running_fixture(LapseSettings {
            enabled: false,
            height_threshold_mm: 0.2,
            ..Default::default()
        });

        assert_eq!(
            fx.trigger.evaluate(PositionSample::Known(0.2)),
            EvaluationOutcome::Rejected(RejectReason::Disabled)
        );
        assert_eq!(
            fx.trigger.capture_now(),
            EvaluationOutcome::Rejected(RejectReason::Disabled)
        );
        assert_eq!(fx.trigger.last_trigger_height(), 0.0);
    }

    #[test]
    fn test_no_job_loaded_never_captures() {
        let fx = running_fixture(height_settings(0.2));
        fx.status.set_job(None);

        assert_eq!(
            fx.trigger.evaluate(PositionSample::Known(0.2)),
            EvaluationOutcome::Rejected(RejectReason::NoJobLoaded)
        );
        assert_eq!(fx.trigger.last_trigger_height(), 0.0);
    }

    #[test]
    fn test_not_running_never_captures() {
        let fx = fixture(height_settings(0.2));

        assert_eq!(
            fx.trigger.evaluate(PositionSample::Known(0.2)),
            EvaluationOutcome::Rejected(RejectReason::NotRunning)
        );
        assert_eq!(
            fx.trigger.capture_now(),
            EvaluationOutcome::Rejected(RejectReason::NotRunning)
        );
        assert_eq!(fx.trigger.last_trigger_height(), 0.0);
    }

    #[test]
    fn test_set_running_arms_and_disarms_timer() {
        let fx = fixture(LapseSettings {
            enabled: true,
            interval_seconds: 10,
            ..Default::default()
        });

        fx.trigger.set_running(true).unwrap();
        assert!(fx.trigger.running());
        assert!(fx.timer.exists(TIMELAPSE_JOB_ID));
        assert_eq!(
            fx.timer.period(TIMELAPSE_JOB_ID),
            Some(Duration::from_secs(10))
        );

        fx.trigger.set_running(false).unwrap();
        assert!(!fx.trigger.running());
        assert!(!fx.timer.exists(TIMELAPSE_JOB_ID));

        fx.trigger.set_running(false).unwrap();
        assert!(!fx.timer.exists(TIMELAPSE_JOB_ID));
    }

    #[test]
    fn test_repeated_arm_replaces_job() {
        let fx = fixture(LapseSettings {
            enabled: true,
            interval_seconds: 10,
            ..Default::default()
        });

        fx.trigger.set_running(true).unwrap();
        fx.trigger.set_running(true).unwrap();

        assert_eq!(fx.timer.len(), 1);
        assert_eq!(fx.timer.schedule_calls(), 2);
    }

    #[test]
    fn test_non_positive_interval_never_schedules() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 0,
            ..Default::default()
        });

        assert!(fx.trigger.running());
        assert!(fx.timer.is_empty());
    }

    #[test]
    fn test_timer_tick_captures() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });

        assert!(fx.timer.fire(TIMELAPSE_JOB_ID));
        assert!(fx.timer.fire(TIMELAPSE_JOB_ID));
        assert!(fx.camera.wait_for_captures(2, WAIT));
    }

    #[test]
    fn test_scheduling_fault_propagates_and_stops() {
        let fx = fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });
        fx.timer.stop();

        let result = fx.trigger.set_running(true);

        assert!(matches!(result, Err(TimerError::SchedulerStopped)));
        assert!(!fx.trigger.running());
    }

    #[test]
    fn test_interval_change_reschedules_while_running() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });

        fx.trigger.set_interval_seconds(20).unwrap();
        assert_eq!(fx.timer.period(TIMELAPSE_JOB_ID), Some(Duration::from_secs(20)));
        assert_eq!(fx.timer.len(), 1);
    }

    #[test]
    fn test_interval_change_while_stopped_applies_on_next_arm() {
        let fx = fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });

        fx.trigger.set_interval_seconds(20).unwrap();
        assert!(fx.timer.is_empty());

        fx.trigger.set_running(true).unwrap();
        assert_eq!(fx.timer.period(TIMELAPSE_JOB_ID), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_zero_interval_while_running_cancels_job() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });
        assert!(fx.timer.exists(TIMELAPSE_JOB_ID));

        fx.trigger.set_interval_seconds(0).unwrap();
        assert!(fx.trigger.running());
        assert!(!fx.timer.exists(TIMELAPSE_JOB_ID));

        fx.trigger.set_running(true).unwrap();
        assert!(!fx.timer.exists(TIMELAPSE_JOB_ID));
    }

    #[test]
    fn test_rearm_with_zero_interval_cancels_stale_job() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });
        // Interval drops to zero behind the setter, leaving the 5 s job in place.
        fx.force_interval(0);

        fx.trigger.set_running(true).unwrap();

        assert!(fx.trigger.running());
        assert!(!fx.timer.exists(TIMELAPSE_JOB_ID));
    }

    #[test]
    fn test_concurrent_start_and_stop_leave_no_job_when_stopped() {
        let gate = Arc::new(GatedTimer::new());
        let trigger = LapseTrigger::new(
            &LapseSettings {
                enabled: true,
                interval_seconds: 5,
                ..Default::default()
            },
            Arc::new(StaticPrintStatus::printing("benchy.gcode")),
            Arc::new(RecordingCaptureSink::new()),
            gate.clone(),
        );

        let starter = {
            let trigger = Arc::clone(&trigger);
            std::thread::spawn(move || trigger.set_running(true))
        };
        // Wait until the starter is parked inside schedule_recurring.
        gate.entered.recv_timeout(WAIT).unwrap();

        let stopper = {
            let trigger = Arc::clone(&trigger);
            std::thread::spawn(move || trigger.set_running(false))
        };
        std::thread::sleep(Duration::from_millis(50));
        gate.release.send(()).unwrap();

        starter.join().unwrap().unwrap();
        stopper.join().unwrap().unwrap();

        assert!(!trigger.running());
        assert!(!gate.inner.exists(TIMELAPSE_JOB_ID));
    }

    #[test]
    fn test_clean_delegates_and_keeps_height() {
        let fx = running_fixture(height_settings(0.2));
        fx.trigger.evaluate(PositionSample::Known(2.0));

        fx.trigger.clean();

        assert_eq!(fx.camera.cleanups(), 1);
        assert_eq!(fx.trigger.last_trigger_height(), 2.0);
    }

    #[test]
    fn test_height_carries_over_between_jobs() {
        let fx = running_fixture(height_settings(0.2));
        fx.trigger.evaluate(PositionSample::Known(2.0));
        fx.trigger.set_running(false).unwrap();
        fx.trigger.clean();

        fx.trigger.set_running(true).unwrap();
        assert_eq!(fx.trigger.last_trigger_height(), 2.0);
        assert_eq!(
            fx.trigger.evaluate(PositionSample::Known(2.0)),
            EvaluationOutcome::Idle
        );

        fx.trigger.reset_height_tracking();
        assert!(fx.trigger.evaluate(PositionSample::Known(0.2)).is_capture());
    }

    #[test]
    fn test_status_snapshot() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            height_threshold_mm: 0.2,
            interval_seconds: 30,
            ..Default::default()
        });
        fx.trigger.evaluate(PositionSample::Known(0.4));

        let status = fx.trigger.status();
        assert_eq!(
            status,
            LapseStatus {
                enabled: true,
                manual_mode: false,
                running: true,
                height_threshold_mm: 0.2,
                last_trigger_height_mm: 0.4,
                interval_seconds: 30,
            }
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["interval_seconds"], 30);
    }

    #[test]
    fn test_drop_disarms_timer() {
        let fx = running_fixture(LapseSettings {
            enabled: true,
            interval_seconds: 5,
            ..Default::default()
        });
        let timer = Arc::clone(&fx.timer);
        assert!(timer.exists(TIMELAPSE_JOB_ID));

        drop(fx);

        assert!(!timer.exists(TIMELAPSE_JOB_ID));
    }
}
