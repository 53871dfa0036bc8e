//! Session calibration: baseline head pose and face geometry

use frame_decode::RasterFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detector::{largest_face, FaceBox, FaceLocator, HeadPose, PoseEstimator};
use crate::DetectionError;

/// Calibration failures. Non-fatal: the caller may retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error(
        "Face not detected consistently during calibration ({usable}/{required} usable frames). \
         Please sit properly and look at the screen."
    )]
    InsufficientFrames { usable: usize, required: usize },

    #[error("Face analysis failed during calibration: {0}")]
    Detection(#[from] DetectionError),
}

/// A student's calibrated "normal" pose and face geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    /// Mean head pose; drifts slowly during normal frames
    pub pose: HeadPose,
    /// Mean face center (cx, cy) in pixels
    pub center: (f32, f32),
    /// Mean face size (w, h) in pixels
    pub size: (f32, f32),
    /// Usable frames averaged
    pub frame_count: usize,
}

impl CalibrationBaseline {
    /// Move the pose a fraction `alpha` of the way towards `observed`
    pub fn adapt(&mut self, observed: &HeadPose, alpha: f32) {
        let blend = |base: f32, obs: f32| (1.0 - alpha) * base + alpha * obs;
        self.pose.yaw = blend(self.pose.yaw, observed.yaw);
        self.pose.pitch = blend(self.pose.pitch, observed.pitch);
        self.pose.roll = blend(self.pose.roll, observed.roll);
    }
}

/// One usable calibration frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub pose: HeadPose,
    pub face: FaceBox,
}

/// Builds a baseline from a batch of frames captured before the exam
#[derive(Debug, Clone, Copy)]
pub struct SessionCalibrator {
    min_frames: usize,
}

impl SessionCalibrator {
    pub fn new(min_frames: usize) -> Self {
        Self { min_frames }
    }

    pub fn min_frames(&self) -> usize {
        self.min_frames
    }

    /// Locate the largest face in each frame, estimate its pose and average
    /// the usable samples. Frames without a face are skipped. A failing
    /// detection capability aborts the batch.
    pub fn calibrate(
        &self,
        frames: &[RasterFrame],
        locator: &dyn FaceLocator,
        estimator: &dyn PoseEstimator,
    ) -> Result<CalibrationBaseline, CalibrationError> {
        let mut samples = Vec::with_capacity(frames.len());

        for (idx, frame) in frames.iter().enumerate() {
            let faces = locator.locate(frame)?;
            let face = match largest_face(&faces) {
                Some(face) if face.area() > 0.0 => face,
                _ => {
                    debug!("Calibration frame {} has no usable face", idx);
                    continue;
                }
            };
            let pose = estimator.estimate(frame, &face)?;
            samples.push(CalibrationSample { pose, face });
        }

        self.baseline_from_samples(&samples)
    }

    /// Average usable samples into a baseline
    pub fn baseline_from_samples(&self, samples: &[CalibrationSample]) -> Result<CalibrationBaseline, CalibrationError> {
        if samples.len() < self.min_frames || samples.is_empty() {
            warn!(
                "Calibration rejected: {} usable frames, {} required",
                samples.len(),
                self.min_frames
            );
            return Err(CalibrationError::InsufficientFrames {
                usable: samples.len(),
                required: self.min_frames,
            });
        }

        let n = samples.len() as f32;
        let mean = |f: fn(&CalibrationSample) -> f32| samples.iter().map(f).sum::<f32>() / n;

        let baseline = CalibrationBaseline {
            pose: HeadPose::new(
                mean(|s| s.pose.yaw),
                mean(|s| s.pose.pitch),
                mean(|s| s.pose.roll),
            ),
            center: (mean(|s| s.face.center().0), mean(|s| s.face.center().1)),
            size: (mean(|s| s.face.width), mean(|s| s.face.height)),
            frame_count: samples.len(),
        };

        info!(
            "Calibrated baseline yaw={:.1} pitch={:.1} roll={:.1} from {} frames",
            baseline.pose.yaw, baseline.pose.pitch, baseline.pose.roll, baseline.frame_count
        );
        Ok(baseline)
    }
}

impl Default for SessionCalibrator {
    fn default() -> Self {
        Self::new(20)
    }
}
