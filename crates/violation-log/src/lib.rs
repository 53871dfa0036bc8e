//! Violation Log
//!
//! SQLite persistence for proctored exam attempts: exam settings,
//! calibration baselines and the durable violation history that drives the
//! exam-level auto-submit decision.

mod records;
mod repository;

pub use records::{
    AttemptRecord, AttemptSettings, AttemptStatus, ProctoringStatus, ViolationRecord, ViolationTally,
};
pub use repository::{Repository, STATUS_WARNING_THRESHOLD};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Attempt not found: {0}")]
    NotFound(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}
