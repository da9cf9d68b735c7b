//! Height-trigger decision logic.
//!
//! Pure domain logic - no I/O, no locking. [`decide`] is called by the
//! trigger after its guards pass.

use serde::{Deserialize, Serialize};

/// Z position reported with an evaluation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "z", rename_all = "lowercase")]
pub enum PositionSample {
    /// A real print-head position in millimetres.
    Known(f64),
    /// No position: a timer tick or a manual request.
    Unknown,
}

impl PositionSample {
    pub fn z(&self) -> Option<f64> {
        match self {
            PositionSample::Known(z) => Some(*z),
            PositionSample::Unknown => None,
        }
    }
}

impl From<Option<f64>> for PositionSample {
    fn from(z: Option<f64>) -> Self {
        z.map_or(PositionSample::Unknown, PositionSample::Known)
    }
}

/// What one evaluation decided once every guard passed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The head dropped more than one threshold below the last trigger
    /// height; tracking restarts at `height` without a capture.
    Reset { height: f64 },
    /// Take a frame. `height` is set for height-triggered captures and is the
    /// new last trigger height.
    Capture { height: Option<f64> },
    /// Nothing to do.
    Idle,
}

/// Convert millimetres to integer hundredths of a millimetre.
///
/// Halves round to even, so 0.125 mm is 12 hundredths, not 13.
fn hundredths(mm: f64) -> i64 {
    (mm * 100.0).round_ties_even() as i64
}

/// Check whether `z` sits on a multiple of `threshold` at 0.01 mm resolution.
///
/// Thresholds that round to zero hundredths disable the check.
pub fn is_layer_multiple(z: f64, threshold: f64) -> bool {
    if !z.is_finite() || !threshold.is_finite() || threshold <= 0.0 {
        return false;
    }
    let step = hundredths(threshold);
    if step == 0 {
        return false;
    }
    hundredths(z).rem_euclid(step) == 0
}

/// Decide what to do with `sample` given the configured threshold and the
/// last trigger height.
pub fn decide(sample: PositionSample, threshold: f64, last_trigger_height: f64) -> Decision {
    let z = match sample {
        PositionSample::Unknown => return Decision::Capture { height: None },
        PositionSample::Known(z) => z,
    };

    if 0.0 < z && z < last_trigger_height - threshold {
        return Decision::Reset { height: z };
    }

    if threshold > 0.0 && is_layer_multiple(z, threshold) && z > last_trigger_height {
        return Decision::Capture { height: Some(z) };
    }

    Decision::Idle
}
