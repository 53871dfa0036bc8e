//! Prometheus metrics

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use proctor::{ProctorStatus, ViolationKind};

use crate::error::StartupError;

pub const FRAMES_TOTAL: &str = "proctor_frames_total";
pub const VIOLATIONS_TOTAL: &str = "proctor_violations_total";
pub const CALIBRATIONS_TOTAL: &str = "proctor_calibrations_total";
pub const ANALYZE_SECONDS: &str = "proctor_analyze_seconds";
pub const LIVE_SESSIONS: &str = "proctor_live_sessions";

/// Install the global Prometheus recorder. Only one per process.
pub fn install_recorder() -> Result<PrometheusHandle, StartupError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    describe_counter!(FRAMES_TOTAL, "Analyzed frames by outcome status");
    describe_counter!(VIOLATIONS_TOTAL, "Scored violations by kind");
    describe_counter!(CALIBRATIONS_TOTAL, "Calibration attempts by result");
    describe_histogram!(ANALYZE_SECONDS, "Decode and analysis latency per frame");
    describe_gauge!(LIVE_SESSIONS, "Live proctoring sessions");
    Ok(handle)
}

pub fn record_frame(status: ProctorStatus) {
    counter!(FRAMES_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_violation(kind: ViolationKind) {
    counter!(VIOLATIONS_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_calibration(result: &'static str) {
    counter!(CALIBRATIONS_TOTAL, "result" => result).increment(1);
}

pub fn observe_analyze(elapsed: Duration) {
    histogram!(ANALYZE_SECONDS).record(elapsed.as_secs_f64());
}

pub fn set_live_sessions(count: usize) {
    gauge!(LIVE_SESSIONS).set(count as f64);
}
