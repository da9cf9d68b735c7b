//! Time-lapse capture trigger for 3D printing.
//!
//! This crate decides *when* to take a time-lapse frame during a print. It
//! combines three signals:
//! - Print-head height (a frame every N millimetres of Z)
//! - Elapsed time (a recurring timer while the print runs)
//! - Job state (nothing happens without a loaded job)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Domain Layer                             │
//! │  decision.rs - PositionSample and height arithmetic (pure)  │
//! │  settings.rs - LapseSettings                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Collaborator Traits                       │
//! │  provider.rs - CaptureSink, PrintStatusSource               │
//! │  timer.rs    - TimerService                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Application Layer                          │
//! │  trigger.rs  - LapseTrigger (guards, tracking, arming)      │
//! │  dispatch.rs - CapturePool (background captures)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lapse_trigger::{LapseSettings, LapseTrigger, PositionSample};
//! use std::sync::Arc;
//!
//! let trigger = LapseTrigger::new(&settings, printer, camera, scheduler);
//! trigger.set_running(true)?;
//!
//! // From the motion observer:
//! trigger.evaluate(PositionSample::Known(0.2));
//! ```

mod decision;
mod dispatch;
mod error;
mod provider;
mod settings;
mod timer;
mod trigger;

pub use decision::{decide, is_layer_multiple, Decision, PositionSample};
pub use dispatch::{CapturePool, DEFAULT_CAPTURE_WORKERS};
pub use error::{SettingsError, SettingsResult, TimerError};
pub use provider::{
    CaptureSink, NullCaptureSink, PrintStatusSource, RecordingCaptureSink, StaticPrintStatus,
};
pub use settings::LapseSettings;
pub use timer::{ManualTimer, TickCallback, TimerService, TIMELAPSE_JOB_ID};
pub use trigger::{EvaluationOutcome, LapseStatus, LapseTrigger, RejectReason};
