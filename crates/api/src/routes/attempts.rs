//! Attempt Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use violation_log::{AttemptRecord, AttemptSettings};

use crate::error::ApiError;
use crate::AppState;

/// Exam settings for one attempt; omitted values use the configured defaults
#[derive(Debug, Default, Deserialize)]
pub struct RegisterAttemptRequest {
    pub max_warnings: Option<u32>,
    pub auto_submit_threshold: Option<u32>,
    pub proctoring_enabled: Option<bool>,
}

/// Register or update an attempt.
///
/// `max_warnings` is read when the live session is created, so a change
/// only affects sessions created afterwards.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(request): Json<RegisterAttemptRequest>,
) -> Result<Json<AttemptRecord>, ApiError> {
    let settings = AttemptSettings {
        attempt_id,
        max_warnings: request.max_warnings.unwrap_or(state.exam.max_warnings),
        auto_submit_threshold: request
            .auto_submit_threshold
            .unwrap_or(state.exam.auto_submit_threshold),
        proctoring_enabled: request
            .proctoring_enabled
            .unwrap_or(state.exam.proctoring_enabled),
    };
    if settings.max_warnings == 0 || settings.auto_submit_threshold == 0 {
        return Err(ApiError::BadRequest(
            "max_warnings and auto_submit_threshold must be at least 1".into(),
        ));
    }

    let record = state.repository.register_attempt(&settings).await?;
    Ok(Json(record))
}
