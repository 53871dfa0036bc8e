//! Proctoring Routes
//!
//! Calibration, per-frame analysis, status and session eviction for one
//! exam attempt. Decoding and inference run on the blocking pool.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use frame_decode::{DecodeError, FrameDecoder, RasterFrame};
use proctor::{
    CalibrationBaseline, HeadPose, PoseDeviation, ProctorOutcome, ProctorStatus, SessionSettings, SessionSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use violation_log::{AttemptRecord, ProctoringStatus};

use crate::error::ApiError;
use crate::{telemetry, AppState};

/// Smallest calibration batch accepted, both submitted and decoded
pub const MIN_CALIBRATION_UPLOAD: usize = 5;

#[derive(Debug, Deserialize)]
pub struct CalibrateRequest {
    #[serde(default)]
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BaselineView {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Serialize)]
pub struct CalibrateResponse {
    pub success: bool,
    pub message: String,
    pub proctoring_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineView>,
    pub frames_used: usize,
}

/// Head pose of the analysed frame; every angle is null without a face
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoseDebug {
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
    pub roll: Option<f32>,
}

impl From<Option<HeadPose>> for PoseDebug {
    fn from(pose: Option<HeadPose>) -> Self {
        match pose {
            Some(pose) => Self {
                yaw: Some(pose.yaw),
                pitch: Some(pose.pitch),
                roll: Some(pose.roll),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub frame: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: ProctorStatus,
    pub message: String,
    pub warning_count: u32,
    pub max_warnings: u32,
    pub total_violations: u32,
    pub should_terminate: bool,
    pub faces_detected: usize,
    pub debug: PoseDebug,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<HeadPose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<PoseDeviation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_secs: Option<f32>,
}

impl AnalyzeResponse {
    fn from_outcome(outcome: ProctorOutcome, max_warnings: u32, total_violations: u32, should_terminate: bool) -> Self {
        Self {
            status: outcome.status,
            message: outcome.message,
            warning_count: outcome.warning_count,
            max_warnings,
            total_violations,
            should_terminate,
            faces_detected: outcome.faces_detected,
            debug: outcome.pose.into(),
            pose: outcome.pose,
            deviation: outcome.deviation,
            deviation_secs: outcome.deviation_secs,
        }
    }

    /// Reply for attempts that are already over
    fn closed(attempt: &AttemptRecord, warning_count: u32) -> Self {
        let message = if attempt.submitted {
            "Exam submitted"
        } else {
            "Exam already terminated."
        };
        Self {
            status: ProctorStatus::Terminate,
            message: message.to_string(),
            warning_count,
            max_warnings: attempt.max_warnings,
            total_violations: attempt.total_violations,
            should_terminate: true,
            faces_detected: 0,
            debug: PoseDebug::default(),
            pose: None,
            deviation: None,
            deviation_secs: None,
        }
    }

    /// Reply for attempts with proctoring switched off
    fn disabled(attempt: &AttemptRecord) -> Self {
        Self {
            status: ProctorStatus::Normal,
            message: "Proctoring disabled".to_string(),
            warning_count: 0,
            max_warnings: attempt.max_warnings,
            total_violations: attempt.total_violations,
            should_terminate: false,
            faces_detected: 0,
            debug: PoseDebug::default(),
            pose: None,
            deviation: None,
            deviation_secs: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViolationSummary {
    #[serde(rename = "type")]
    pub violation_type: String,
    pub severity: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub calibration_completed: bool,
    pub total_violations: u32,
    pub proctoring_status: ProctoringStatus,
    pub submitted: bool,
    pub recent_violations: Vec<ViolationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<SessionSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    pub closed: bool,
}

/// Frame as it arrived on the wire
enum FramePayload {
    Base64(String),
    Binary(Bytes),
}

impl FramePayload {
    fn decode(&self, decoder: &FrameDecoder) -> Result<RasterFrame, DecodeError> {
        match self {
            FramePayload::Base64(payload) => decoder.decode_base64(payload),
            FramePayload::Binary(bytes) => decoder.decode_bytes(bytes),
        }
    }
}

/// The attempt row, created with the configured exam defaults if unknown
async fn resolve_attempt(state: &AppState, attempt_id: &str) -> Result<AttemptRecord, ApiError> {
    Ok(state
        .repository
        .ensure_attempt(&state.default_attempt(attempt_id))
        .await?)
}

/// Calibrate an attempt from a batch of base64 frames
pub async fn calibrate(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(request): Json<CalibrateRequest>,
) -> Result<Json<CalibrateResponse>, ApiError> {
    let attempt = resolve_attempt(&state, &attempt_id).await?;
    if attempt.submitted {
        return Err(ApiError::Conflict("Exam submitted".into()));
    }
    if !attempt.proctoring_enabled {
        return Ok(Json(CalibrateResponse {
            success: true,
            message: "Proctoring disabled".to_string(),
            proctoring_enabled: false,
            baseline: None,
            frames_used: 0,
        }));
    }
    if request.frames.len() < MIN_CALIBRATION_UPLOAD {
        return Err(ApiError::BadRequest(format!(
            "At least {} frames required",
            MIN_CALIBRATION_UPLOAD
        )));
    }

    let settings = SessionSettings {
        max_warnings: attempt.max_warnings,
    };
    let task_state = Arc::clone(&state);
    let task_id = attempt_id.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<(CalibrationBaseline, usize), ApiError> {
        let frames: Vec<RasterFrame> = request
            .frames
            .iter()
            .enumerate()
            .filter_map(|(idx, payload)| match task_state.decoder.decode_base64(payload) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!("Calibration frame {} rejected: {}", idx, e);
                    None
                }
            })
            .collect();
        if frames.len() < MIN_CALIBRATION_UPLOAD {
            return Err(ApiError::BadRequest("Failed to decode frames".into()));
        }

        let baseline = task_state.monitor.calibrate(&task_id, settings, &frames)?;
        Ok((baseline, frames.len()))
    })
    .await?;

    let (baseline, decoded) = match result {
        Ok(calibrated) => calibrated,
        Err(e) => {
            telemetry::record_calibration("failed");
            return Err(e);
        }
    };

    state.repository.record_calibration(&attempt_id, &baseline).await?;
    telemetry::record_calibration("success");
    telemetry::set_live_sessions(state.monitor.session_count());
    info!(attempt = %attempt_id, decoded, usable = baseline.frame_count, "Calibration successful");

    Ok(Json(CalibrateResponse {
        success: true,
        message: "Calibration successful".to_string(),
        proctoring_enabled: true,
        baseline: Some(BaselineView {
            yaw: baseline.pose.yaw,
            pitch: baseline.pose.pitch,
            roll: baseline.pose.roll,
        }),
        frames_used: baseline.frame_count,
    }))
}

/// Analyze one base64 frame
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    analyze_payload(state, attempt_id, FramePayload::Base64(request.frame)).await
}

/// Analyze one binary frame (request body is the encoded image)
pub async fn analyze_binary(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    body: Bytes,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    analyze_payload(state, attempt_id, FramePayload::Binary(body)).await
}

async fn analyze_payload(
    state: Arc<AppState>,
    attempt_id: String,
    payload: FramePayload,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let attempt = resolve_attempt(&state, &attempt_id).await?;
    if attempt.submitted || attempt.proctoring_status == ProctoringStatus::Terminated {
        let warning_count = state
            .monitor
            .snapshot(&attempt_id)?
            .map(|s| s.warning_count)
            .unwrap_or(0);
        return Ok(Json(AnalyzeResponse::closed(&attempt, warning_count)));
    }
    if !attempt.proctoring_enabled {
        return Ok(Json(AnalyzeResponse::disabled(&attempt)));
    }

    let settings = SessionSettings {
        max_warnings: attempt.max_warnings,
    };
    let started = Instant::now();
    let task_state = Arc::clone(&state);
    let task_id = attempt_id.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<ProctorOutcome, ApiError> {
        let frame = payload.decode(&task_state.decoder)?;
        Ok(task_state.monitor.analyze(&task_id, settings, &frame)?)
    })
    .await??;

    telemetry::observe_analyze(started.elapsed());
    telemetry::record_frame(outcome.status);

    let mut total_violations = attempt.total_violations;
    let mut auto_submitted = false;
    let mut stored = true;
    if let Some(event) = &outcome.event {
        telemetry::record_violation(event.kind);
        match state.repository.record_violation(&attempt_id, event).await {
            Ok(tally) => {
                total_violations = tally.total_violations;
                auto_submitted = tally.submitted;
            }
            Err(e) => {
                warn!(attempt = %attempt_id, error = %e, kind = event.kind.as_str(), "Violation could not be stored");
                stored = false;
            }
        }
    } else if outcome.is_terminal() {
        // Terminated live session whose durable status was never written
        if let Err(e) = state.repository.mark_terminated(&attempt_id).await {
            warn!(attempt = %attempt_id, error = %e, "Termination could not be stored");
            stored = false;
        }
    }

    let should_terminate = outcome.is_terminal() || auto_submitted;
    // The live session keeps answering TERMINATE until the durable status is written
    if should_terminate && stored {
        state.monitor.close(&attempt_id)?;
        info!(attempt = %attempt_id, total_violations, "Session ended, live state evicted");
    }
    telemetry::set_live_sessions(state.monitor.session_count());

    Ok(Json(AnalyzeResponse::from_outcome(
        outcome,
        attempt.max_warnings,
        total_violations,
        should_terminate,
    )))
}

/// Durable proctoring status plus the live session, if any
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state
        .repository
        .status(&attempt_id, state.exam.recent_violations)
        .await?;
    let live = state.monitor.snapshot(&attempt_id)?;

    Ok(Json(StatusResponse {
        calibration_completed: status.calibration_completed,
        total_violations: status.total_violations,
        proctoring_status: status.proctoring_status,
        submitted: status.submitted,
        recent_violations: status
            .recent_violations
            .iter()
            .map(|v| ViolationSummary {
                violation_type: v.violation_type.clone(),
                severity: v.severity.clone(),
                message: v.message.clone(),
                timestamp: v.timestamp().to_rfc3339(),
            })
            .collect(),
        live,
    }))
}

/// Evict the live session of an attempt
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<Json<CloseResponse>, ApiError> {
    let closed = state.monitor.close(&attempt_id)?;
    telemetry::set_live_sessions(state.monitor.session_count());
    Ok(Json(CloseResponse { closed }))
}
