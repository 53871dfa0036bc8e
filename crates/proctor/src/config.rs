//! Proctoring configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ProctorError;

/// Soft/hard bound for one rotation axis (degrees of deviation from baseline)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisThreshold {
    pub soft: f32,
    pub hard: f32,
}

impl AxisThreshold {
    pub const fn new(soft: f32, hard: f32) -> Self {
        Self { soft, hard }
    }
}

/// Deviation thresholds used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviationThresholds {
    pub yaw: AxisThreshold,
    pub pitch: AxisThreshold,
    pub roll: AxisThreshold,
    /// Horizontal face-center shift, as a fraction of baseline face width,
    /// above which the frame is a hard deviation
    pub max_center_shift_ratio: f32,
}

impl Default for DeviationThresholds {
    fn default() -> Self {
        Self {
            yaw: AxisThreshold::new(15.0, 30.0),
            pitch: AxisThreshold::new(15.0, 30.0),
            roll: AxisThreshold::new(20.0, 35.0),
            max_center_shift_ratio: 0.5,
        }
    }
}

/// Proctoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    /// Pose and geometry thresholds
    pub thresholds: DeviationThresholds,

    /// Time without any face before a warning (milliseconds)
    pub no_face_timeout_ms: u64,

    /// Minimum gap between issued warnings (milliseconds)
    pub warning_cooldown_ms: u64,

    /// Soft deviation must persist this long to warn (milliseconds)
    pub soft_deviation_min_ms: u64,

    /// Hard deviation must persist this long to warn (milliseconds)
    pub hard_deviation_min_ms: u64,

    /// Usable frames required for calibration
    pub min_calibration_frames: usize,

    /// Exponential smoothing factor for baseline drift on normal frames
    pub baseline_adaptation_rate: f32,

    /// Face detection confidence threshold
    pub min_face_confidence: f32,

    /// Minimum face box area relative to the frame area
    pub min_face_area_ratio: f32,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            thresholds: DeviationThresholds::default(),
            no_face_timeout_ms: 2000,
            warning_cooldown_ms: 5000,
            soft_deviation_min_ms: 2000,
            hard_deviation_min_ms: 500,
            min_calibration_frames: 20,
            baseline_adaptation_rate: 0.02,
            min_face_confidence: 0.6,
            min_face_area_ratio: 0.02,
        }
    }
}

impl ProctorConfig {
    /// Create strict config (tighter angles, shorter grace periods)
    pub fn strict() -> Self {
        Self {
            thresholds: DeviationThresholds {
                yaw: AxisThreshold::new(10.0, 20.0),
                pitch: AxisThreshold::new(10.0, 20.0),
                roll: AxisThreshold::new(15.0, 25.0),
                ..Default::default()
            },
            no_face_timeout_ms: 1000,
            soft_deviation_min_ms: 1500,
            warning_cooldown_ms: 3000,
            ..Default::default()
        }
    }

    /// Create lenient config (wider angles, longer grace periods)
    pub fn lenient() -> Self {
        Self {
            thresholds: DeviationThresholds {
                yaw: AxisThreshold::new(20.0, 40.0),
                pitch: AxisThreshold::new(20.0, 40.0),
                roll: AxisThreshold::new(25.0, 45.0),
                ..Default::default()
            },
            no_face_timeout_ms: 4000,
            soft_deviation_min_ms: 3000,
            hard_deviation_min_ms: 1000,
            warning_cooldown_ms: 8000,
            ..Default::default()
        }
    }

    pub fn no_face_timeout(&self) -> Duration {
        Duration::from_millis(self.no_face_timeout_ms)
    }

    pub fn warning_cooldown(&self) -> Duration {
        Duration::from_millis(self.warning_cooldown_ms)
    }

    pub fn soft_deviation_min(&self) -> Duration {
        Duration::from_millis(self.soft_deviation_min_ms)
    }

    pub fn hard_deviation_min(&self) -> Duration {
        Duration::from_millis(self.hard_deviation_min_ms)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ProctorError> {
        let axes = [
            ("yaw", self.thresholds.yaw),
            ("pitch", self.thresholds.pitch),
            ("roll", self.thresholds.roll),
        ];
        for (name, axis) in axes {
            if !axis.soft.is_finite() || !axis.hard.is_finite() || axis.soft < 0.0 {
                return Err(ProctorError::Config(format!(
                    "{} thresholds must be finite and non-negative",
                    name
                )));
            }
            if axis.soft > axis.hard {
                return Err(ProctorError::Config(format!(
                    "{} soft threshold {} exceeds hard threshold {}",
                    name, axis.soft, axis.hard
                )));
            }
        }

        let ratio = self.thresholds.max_center_shift_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ProctorError::Config(
                "max_center_shift_ratio must be positive".into(),
            ));
        }

        let rate = self.baseline_adaptation_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ProctorError::Config(format!(
                "baseline_adaptation_rate {} outside (0, 1]",
                rate
            )));
        }

        if self.min_calibration_frames == 0 {
            return Err(ProctorError::Config(
                "min_calibration_frames must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.min_face_confidence)
            || !(0.0..=1.0).contains(&self.min_face_area_ratio)
        {
            return Err(ProctorError::Config(
                "face filter values must lie in [0, 1]".into(),
            ));
        }

        Ok(())
    }
}
