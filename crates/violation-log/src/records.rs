//! Stored record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::StorageError;

/// Durable proctoring status of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProctoringStatus {
    Active,
    Warning,
    Terminated,
}

impl ProctoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProctoringStatus::Active => "active",
            ProctoringStatus::Warning => "warning",
            ProctoringStatus::Terminated => "terminated",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "active" => Ok(ProctoringStatus::Active),
            "warning" => Ok(ProctoringStatus::Warning),
            "terminated" => Ok(ProctoringStatus::Terminated),
            other => Err(StorageError::InvalidRecord(format!("proctoring status '{}'", other))),
        }
    }
}

/// Exam settings registered for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSettings {
    pub attempt_id: String,
    /// In-memory warning ceiling of the live session
    pub max_warnings: u32,
    /// Durable violation count that auto-submits the exam
    pub auto_submit_threshold: u32,
    /// When false, frames are acknowledged without running detection
    #[serde(default = "enabled")]
    pub proctoring_enabled: bool,
}

fn enabled() -> bool {
    true
}

/// One attempt row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    pub max_warnings: u32,
    pub auto_submit_threshold: u32,
    pub proctoring_enabled: bool,
    pub calibration_completed: bool,
    pub total_violations: u32,
    pub proctoring_status: ProctoringStatus,
    pub submitted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct AttemptRow {
    pub attempt_id: String,
    pub max_warnings: i64,
    pub auto_submit_threshold: i64,
    pub proctoring_enabled: bool,
    pub calibration_completed: bool,
    pub total_violations: i64,
    pub proctoring_status: String,
    pub submitted: bool,
    pub updated_at_ms: i64,
}

impl TryFrom<AttemptRow> for AttemptRecord {
    type Error = StorageError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Self {
            proctoring_status: ProctoringStatus::parse(&row.proctoring_status)?,
            attempt_id: row.attempt_id,
            max_warnings: row.max_warnings.max(0) as u32,
            auto_submit_threshold: row.auto_submit_threshold.max(0) as u32,
            proctoring_enabled: row.proctoring_enabled,
            calibration_completed: row.calibration_completed,
            total_violations: row.total_violations.max(0) as u32,
            submitted: row.submitted,
            updated_at: from_millis(row.updated_at_ms),
        })
    }
}

/// One logged violation
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ViolationRecord {
    pub id: i64,
    pub attempt_id: String,
    pub violation_type: String,
    pub severity: String,
    pub message: String,
    pub timestamp_ms: i64,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub deviation_yaw: Option<f64>,
    pub deviation_pitch: Option<f64>,
    pub deviation_roll: Option<f64>,
    pub faces_detected: i64,
}

impl ViolationRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        from_millis(self.timestamp_ms)
    }
}

/// Durable counters after a violation was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViolationTally {
    pub total_violations: u32,
    pub proctoring_status: ProctoringStatus,
    pub submitted: bool,
    /// The auto-submit threshold fired on this violation
    pub auto_submitted: bool,
}

/// Status query result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptStatus {
    pub calibration_completed: bool,
    pub total_violations: u32,
    pub proctoring_status: ProctoringStatus,
    pub submitted: bool,
    /// Newest first
    pub recent_violations: Vec<ViolationRecord>,
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
