//! Static time-lapse configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatch::DEFAULT_CAPTURE_WORKERS;
use crate::error::{SettingsError, SettingsResult};

/// Construction-time settings for a [`LapseTrigger`](crate::LapseTrigger).
///
/// Missing JSON fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LapseSettings {
    /// Master switch. A disabled trigger never captures.
    pub enabled: bool,
    /// Captures are operator-triggered only. Exposed for hosts; the trigger
    /// itself does not act on it.
    pub manual_mode: bool,
    /// Vertical distance between height-triggered captures (mm).
    /// `<= 0` disables height triggering.
    pub height_threshold_mm: f64,
    /// Period of the recurring capture timer. `<= 0` disables it.
    pub interval_seconds: i64,
    /// Worker threads running captures.
    pub capture_workers: usize,
}

impl Default for LapseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            manual_mode: false,
            height_threshold_mm: 0.0,
            interval_seconds: 0,
            capture_workers: DEFAULT_CAPTURE_WORKERS,
        }
    }
}

impl LapseSettings {
    /// Parse and validate settings from a JSON string.
    pub fn from_json_str(json: &str) -> SettingsResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;

        tracing::debug!(
            path = %path.display(),
            enabled = settings.enabled,
            height_threshold_mm = settings.height_threshold_mm,
            interval_seconds = settings.interval_seconds,
            "Time-lapse settings loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if !self.height_threshold_mm.is_finite() {
            return Err(SettingsError::Validation {
                message: format!(
                    "height_threshold_mm must be finite, got {}",
                    self.height_threshold_mm
                ),
            });
        }
        if self.capture_workers == 0 {
            return Err(SettingsError::Validation {
                message: "capture_workers must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
