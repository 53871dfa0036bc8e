//! Visual Proctoring API Server
//!
//! REST service in front of the proctoring core: attempt registration,
//! calibration, per-frame analysis and durable violation status.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use frame_decode::{DecoderConfig, FrameDecoder};
use metrics_exporter_prometheus::PrometheusHandle;
use proctor::{OnnxFaceLocator, OnnxPoseEstimator, ProctorMonitor};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use violation_log::{AttemptSettings, Repository};

pub mod error;
pub mod routes;
pub mod settings;
pub mod telemetry;

pub use error::{ApiError, StartupError};
pub use settings::{ExamSettings, LoggingSettings, ServiceConfig};

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<ProctorMonitor>,
    pub repository: Repository,
    pub decoder: FrameDecoder,
    /// Defaults for attempts that were never registered
    pub exam: ExamSettings,
    /// Absent when no recorder is installed (tests)
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(monitor: Arc<ProctorMonitor>, repository: Repository, decoder: FrameDecoder, exam: ExamSettings) -> Self {
        Self {
            monitor,
            repository,
            decoder,
            exam,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Attempt settings used when an unknown attempt shows up
    pub fn default_attempt(&self, attempt_id: &str) -> AttemptSettings {
        AttemptSettings {
            attempt_id: attempt_id.to_string(),
            max_warnings: self.exam.max_warnings,
            auto_submit_threshold: self.exam.auto_submit_threshold,
            proctoring_enabled: self.exam.proctoring_enabled,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub live_sessions: usize,
    pub database: String,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/attempts/:id", put(routes::attempts::register))
        .route("/api/v1/proctor/:id/calibrate", post(routes::sessions::calibrate))
        .route("/api/v1/proctor/:id/analyze", post(routes::sessions::analyze))
        .route("/api/v1/proctor/:id/frame", post(routes::sessions::analyze_binary))
        .route("/api/v1/proctor/:id/status", get(routes::sessions::status))
        .route("/api/v1/proctor/:id", delete(routes::sessions::close))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit_bytes)),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.repository.health_check().await {
        Ok(true) => "ok".to_string(),
        Ok(false) => "degraded".to_string(),
        Err(e) => {
            warn!("Database health check failed: {}", e);
            "unavailable".to_string()
        }
    };
    let status = if database == "ok" { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        live_sessions: state.monitor.session_count(),
        database,
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> Result<(), StartupError> {
    let level = Level::from_str(&settings.level)
        .map_err(|_| StartupError::Config(format!("unknown log level '{}'", settings.level)))?;

    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(true);
    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| StartupError::Logging(e.to_string()))
}

/// Load the detection models, open storage and assemble the shared state
pub async fn build_state(config: &ServiceConfig) -> Result<AppState, StartupError> {
    let models = &config.models;
    let locator = OnnxFaceLocator::from_path(
        &models.face_detector,
        models.face_input_width,
        models.face_input_height,
        config.face_filter(),
    )?;
    let estimator = OnnxPoseEstimator::from_path(&models.head_pose, models.pose_input_width, models.pose_input_height)?;
    info!("Detection models loaded");

    let monitor = ProctorMonitor::new(Arc::new(locator), Arc::new(estimator), config.proctor.clone())
        .map_err(|e| StartupError::Config(e.to_string()))?;
    let repository = Repository::connect(&config.database.url, config.database.max_connections).await?;
    let decoder = FrameDecoder::new(DecoderConfig {
        max_encoded_bytes: config.server.max_frame_bytes,
        ..DecoderConfig::default()
    });

    Ok(AppState::new(Arc::new(monitor), repository, decoder, config.exam.clone()))
}

/// Run the server
pub async fn run_server(config: ServiceConfig) -> Result<(), StartupError> {
    let metrics = telemetry::install_recorder()?;
    let state = build_state(&config).await?.with_metrics(metrics);
    let app = create_router(Arc::new(state), config.server.body_limit_bytes);

    let addr = config.server.bind_addr();
    info!("Starting proctoring API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
