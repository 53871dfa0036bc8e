//! Per-frame outcomes and violation events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::PoseDeviation;
use crate::detector::HeadPose;

/// Outcome status of one processed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProctorStatus {
    Normal,
    Warning,
    Terminate,
    NoFace,
    Error,
}

impl ProctorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProctorStatus::Normal => "NORMAL",
            ProctorStatus::Warning => "WARNING",
            ProctorStatus::Terminate => "TERMINATE",
            ProctorStatus::NoFace => "NO_FACE",
            ProctorStatus::Error => "ERROR",
        }
    }
}

/// Kind of a scored violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// No face for longer than the grace period
    NoFace,
    /// More than one face in frame
    MultipleFaces,
    /// Sustained head-pose or position deviation
    Warning,
    /// Warning ceiling reached
    Terminate,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::NoFace => "NO_FACE",
            ViolationKind::MultipleFaces => "MULTIPLE_FACES",
            ViolationKind::Warning => "WARNING",
            ViolationKind::Terminate => "TERMINATE",
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Audit record handed to the persistence layer for every scored violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<HeadPose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<PoseDeviation>,
    pub faces_detected: usize,
    pub warning_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProctorOutcome {
    pub status: ProctorStatus,

    /// Plain-language message for the student
    pub message: String,

    pub faces_detected: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<HeadPose>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<PoseDeviation>,

    /// Elapsed time of an in-progress deviation run (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_secs: Option<f32>,

    /// Session warning count after this frame
    pub warning_count: u32,

    /// Present when this frame produced a scored violation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ViolationEvent>,
}

impl ProctorOutcome {
    pub fn new(status: ProctorStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            faces_detected: 0,
            pose: None,
            deviation: None,
            deviation_secs: None,
            warning_count: 0,
            event: None,
        }
    }

    /// ERROR outcome (caller contract or detection failure)
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProctorStatus::Error, message)
    }

    pub fn with_faces(mut self, faces_detected: usize) -> Self {
        self.faces_detected = faces_detected;
        self
    }

    pub fn with_pose(mut self, pose: Option<HeadPose>, deviation: Option<PoseDeviation>) -> Self {
        self.pose = pose;
        self.deviation = deviation;
        self
    }

    pub fn with_warning_count(mut self, warning_count: u32) -> Self {
        self.warning_count = warning_count;
        self
    }

    /// Whether the session ended with this frame
    pub fn is_terminal(&self) -> bool {
        self.status == ProctorStatus::Terminate
    }

    /// Whether this outcome is a policy result rather than a failure
    pub fn is_policy(&self) -> bool {
        self.status != ProctorStatus::Error
    }
}
