//! Visual Exam Proctoring
//!
//! Real-time per-attempt monitoring of a webcam stream:
//! - Baseline calibration of head pose and face geometry
//! - Soft/hard head-pose deviation classification
//! - Debounced, cooldown-limited warning escalation
//! - Auto-termination once the warning ceiling is reached
//!
//! Face detection and head-pose estimation are consumed through the
//! [`FaceLocator`] and [`PoseEstimator`] capabilities.

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod machine;
pub mod monitor;
pub mod onnx;
pub mod outcome;
pub mod registry;

pub use calibration::{CalibrationBaseline, CalibrationError, SessionCalibrator};
pub use classifier::{Classification, DeviationClassifier, DeviationLevel, PoseDeviation};
pub use config::{AxisThreshold, DeviationThresholds, ProctorConfig};
pub use detector::{largest_face, FaceBox, FaceFilter, FaceLocator, HeadPose, PoseEstimator};
pub use machine::{FrameObservation, SessionSnapshot, ViolationStateMachine};
pub use monitor::{ProctorMonitor, DETECTION_UNAVAILABLE};
pub use onnx::{OnnxFaceLocator, OnnxPoseEstimator};
pub use outcome::{ProctorOutcome, ProctorStatus, Severity, ViolationEvent, ViolationKind};
pub use registry::{SessionHandle, SessionRegistry, SessionSettings, SessionStore};

use thiserror::Error;

/// Failures of the face/pose detection capabilities
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model output contract violated: {0}")]
    OutputContract(String),

    #[error("Invalid face region: {0}")]
    InvalidRegion(String),
}

/// Proctoring error types
#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session lock poisoned for {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
