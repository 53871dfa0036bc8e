//! Head-pose deviation classification

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationBaseline;
use crate::config::{AxisThreshold, DeviationThresholds};
use crate::detector::{FaceBox, HeadPose};

/// Severity tier of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationLevel {
    Within,
    Soft,
    Hard,
}

/// Absolute deviation from the baseline, per axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseDeviation {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    /// Horizontal face-center shift (pixels)
    pub center_shift: f32,
}

/// Classifier verdict for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub level: DeviationLevel,
    pub deviation: PoseDeviation,
    /// The face moved further than the allowed share of the baseline width
    pub geometric_shift: bool,
}

impl Classification {
    pub fn is_deviated(&self) -> bool {
        self.level != DeviationLevel::Within
    }

    pub fn is_hard(&self) -> bool {
        self.level == DeviationLevel::Hard
    }
}

/// Stateless classifier; safe to share across sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviationClassifier {
    thresholds: DeviationThresholds,
}

fn axis_level(delta: f32, axis: AxisThreshold) -> DeviationLevel {
    if delta > axis.hard {
        DeviationLevel::Hard
    } else if delta > axis.soft {
        DeviationLevel::Soft
    } else {
        DeviationLevel::Within
    }
}

impl DeviationClassifier {
    pub fn new(thresholds: DeviationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DeviationThresholds {
        &self.thresholds
    }

    /// Absolute deviations of the current observation
    pub fn deviation(&self, pose: &HeadPose, face: &FaceBox, baseline: &CalibrationBaseline) -> PoseDeviation {
        let (cx, _) = face.center();
        PoseDeviation {
            yaw: (pose.yaw - baseline.pose.yaw).abs(),
            pitch: (pose.pitch - baseline.pose.pitch).abs(),
            roll: (pose.roll - baseline.pose.roll).abs(),
            center_shift: (cx - baseline.center.0).abs(),
        }
    }

    /// Classify the current pose and face box against the baseline.
    ///
    /// Any axis past its soft bound deviates; any axis past its hard bound,
    /// or a center shift beyond `max_center_shift_ratio` of the baseline
    /// face width, is a hard deviation.
    pub fn classify(&self, pose: &HeadPose, face: &FaceBox, baseline: &CalibrationBaseline) -> Classification {
        let deviation = self.deviation(pose, face, baseline);

        // Zero-width baselines fall back to the current face width
        let reference_width = if baseline.size.0 > 0.0 {
            baseline.size.0
        } else {
            face.width
        };
        let geometric_shift =
            deviation.center_shift > self.thresholds.max_center_shift_ratio * reference_width;

        let level = if geometric_shift {
            DeviationLevel::Hard
        } else {
            [
                axis_level(deviation.yaw, self.thresholds.yaw),
                axis_level(deviation.pitch, self.thresholds.pitch),
                axis_level(deviation.roll, self.thresholds.roll),
            ]
            .into_iter()
            .max()
            .unwrap_or(DeviationLevel::Within)
        };

        Classification {
            level,
            deviation,
            geometric_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn baseline() -> CalibrationBaseline {
        CalibrationBaseline {
            pose: HeadPose::new(0.0, 0.0, 0.0),
            center: (320.0, 240.0),
            size: (200.0, 220.0),
            frame_count: 20,
        }
    }

    /// Face box with the baseline geometry, shifted horizontally
    fn face_at(dx: f32) -> FaceBox {
        FaceBox::new(220.0 + dx, 130.0, 200.0, 220.0, 0.9)
    }

    #[test]
    fn test_within_tolerance() {
        let classifier = DeviationClassifier::default();
        let c = classifier.classify(&HeadPose::new(10.0, -12.0, 18.0), &face_at(0.0), &baseline());
        assert_eq!(c.level, DeviationLevel::Within);
        assert!(!c.is_deviated());
        assert_eq!(c.deviation.center_shift, 0.0);
    }

    #[test]
    fn test_soft_on_single_axis() {
        let classifier = DeviationClassifier::default();
        let c = classifier.classify(&HeadPose::new(20.0, 0.0, 0.0), &face_at(0.0), &baseline());
        assert_eq!(c.level, DeviationLevel::Soft);
        assert!(c.is_deviated());
        assert!(!c.is_hard());
    }

    #[test]
    fn test_hard_on_any_axis() {
        let classifier = DeviationClassifier::default();
        let c = classifier.classify(&HeadPose::new(0.0, 0.0, -36.0), &face_at(0.0), &baseline());
        assert_eq!(c.level, DeviationLevel::Hard);
        assert_eq!(c.deviation.roll, 36.0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let classifier = DeviationClassifier::default();
        let c = classifier.classify(&HeadPose::new(15.0, 30.0, 0.0), &face_at(0.0), &baseline());
        assert_eq!(c.level, DeviationLevel::Soft);
    }

    #[test]
    fn test_geometric_shift_is_always_hard() {
        let classifier = DeviationClassifier::default();
        // half of the 200px baseline width is 100px
        let c = classifier.classify(&HeadPose::default(), &face_at(101.0), &baseline());
        assert!(c.geometric_shift);
        assert_eq!(c.level, DeviationLevel::Hard);

        let c = classifier.classify(&HeadPose::default(), &face_at(-99.0), &baseline());
        assert!(!c.geometric_shift);
        assert_eq!(c.level, DeviationLevel::Within);
    }

    #[test]
    fn test_deviation_is_relative_to_baseline() {
        let classifier = DeviationClassifier::default();
        let mut base = baseline();
        base.pose = HeadPose::new(-10.0, 5.0, 0.0);
        let c = classifier.classify(&HeadPose::new(-10.0, 5.0, 0.0), &face_at(0.0), &base);
        assert_eq!(c.deviation, PoseDeviation::default());
    }

    proptest! {
        #[test]
        fn hard_implies_soft_bound_crossed(
            yaw in -90f32..90.0, pitch in -90f32..90.0, roll in -90f32..90.0
        ) {
            let classifier = DeviationClassifier::default();
            let c = classifier.classify(&HeadPose::new(yaw, pitch, roll), &face_at(0.0), &baseline());
            let t = classifier.thresholds();
            let any_soft = yaw.abs() > t.yaw.soft || pitch.abs() > t.pitch.soft || roll.abs() > t.roll.soft;
            let any_hard = yaw.abs() > t.yaw.hard || pitch.abs() > t.pitch.hard || roll.abs() > t.roll.hard;
            prop_assert_eq!(c.is_deviated(), any_soft);
            prop_assert_eq!(c.is_hard(), any_hard);
        }
    }
}
