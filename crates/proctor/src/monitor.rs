//! Frame-to-outcome pipeline
//!
//! Inference runs without holding a session lock; only the state update is
//! serialized per attempt.

use std::sync::{Arc, MutexGuard};
use std::time::Instant;

use frame_decode::RasterFrame;
use tracing::{debug, warn};

use crate::calibration::{CalibrationBaseline, SessionCalibrator};
use crate::config::ProctorConfig;
use crate::detector::{largest_face, FaceLocator, PoseEstimator};
use crate::machine::{FrameObservation, SessionSnapshot, ViolationStateMachine};
use crate::outcome::ProctorOutcome;
use crate::registry::{SessionHandle, SessionRegistry, SessionSettings, SessionStore};
use crate::{DetectionError, ProctorError};

/// Shown to the student when detection fails; the cause is only logged
pub const DETECTION_UNAVAILABLE: &str = "Face analysis temporarily unavailable, please stay in view";

/// Proctoring entry point shared by all attempts
pub struct ProctorMonitor {
    locator: Arc<dyn FaceLocator>,
    estimator: Arc<dyn PoseEstimator>,
    config: Arc<ProctorConfig>,
    calibrator: SessionCalibrator,
    sessions: Arc<dyn SessionStore>,
}

fn lock_session<'a>(
    handle: &'a SessionHandle,
    session_id: &str,
) -> Result<MutexGuard<'a, ViolationStateMachine>, ProctorError> {
    handle
        .lock()
        .map_err(|_| ProctorError::LockPoisoned(session_id.to_string()))
}

impl ProctorMonitor {
    /// Monitor with an in-memory session registry
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        estimator: Arc<dyn PoseEstimator>,
        config: ProctorConfig,
    ) -> Result<Self, ProctorError> {
        config.validate()?;
        let config = Arc::new(config);
        let sessions: Arc<dyn SessionStore> = Arc::new(SessionRegistry::new(Arc::clone(&config)));
        Ok(Self::with_store(locator, estimator, config, sessions))
    }

    pub fn with_store(
        locator: Arc<dyn FaceLocator>,
        estimator: Arc<dyn PoseEstimator>,
        config: Arc<ProctorConfig>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let calibrator = SessionCalibrator::new(config.min_calibration_frames);
        Self {
            locator,
            estimator,
            config,
            calibrator,
            sessions,
        }
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    /// Live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Face count, largest face and its pose for one frame.
    ///
    /// A face region that cannot be cropped yields an observation without a
    /// pose instead of an error.
    pub fn observe(&self, frame: &RasterFrame) -> Result<FrameObservation, DetectionError> {
        let faces = self.locator.locate(frame)?;
        let Some(face) = largest_face(&faces) else {
            return Ok(FrameObservation::no_face());
        };
        match self.estimator.estimate(frame, &face) {
            Ok(pose) => Ok(FrameObservation::faces(faces.len(), face, pose)),
            Err(DetectionError::InvalidRegion(detail)) => {
                debug!("Face region rejected: {}", detail);
                Ok(FrameObservation::unusable_region(faces.len(), face))
            }
            Err(e) => Err(e),
        }
    }

    /// Calibrate (or recalibrate) an attempt from a batch of frames
    pub fn calibrate(
        &self,
        session_id: &str,
        settings: SessionSettings,
        frames: &[RasterFrame],
    ) -> Result<CalibrationBaseline, ProctorError> {
        let handle = self.sessions.get_or_create(session_id, settings)?;

        let baseline = self
            .calibrator
            .calibrate(frames, self.locator.as_ref(), self.estimator.as_ref())
            .map_err(|e| {
                warn!(session = %session_id, error = %e, "Calibration failed");
                e
            })?;

        lock_session(&handle, session_id)?.apply_calibration(baseline, Instant::now());
        Ok(baseline)
    }

    /// Analyze one frame of an attempt.
    ///
    /// Detection failures come back as an ERROR outcome and leave the
    /// session untouched. `Err` is reserved for registry failures.
    pub fn analyze(
        &self,
        session_id: &str,
        settings: SessionSettings,
        frame: &RasterFrame,
    ) -> Result<ProctorOutcome, ProctorError> {
        let handle = self.sessions.get_or_create(session_id, settings)?;

        if let Some(outcome) = lock_session(&handle, session_id)?.precheck() {
            return Ok(outcome);
        }

        let observation = match self.observe(frame) {
            Ok(observation) => observation,
            Err(e) => {
                warn!(session = %session_id, error = %e, "Frame analysis failed");
                let warning_count = lock_session(&handle, session_id)?.warning_count();
                return Ok(ProctorOutcome::error(DETECTION_UNAVAILABLE).with_warning_count(warning_count));
            }
        };

        let outcome = lock_session(&handle, session_id)?.process(&observation, Instant::now());
        debug!(session = %session_id, status = outcome.status.as_str(), "Frame analyzed");
        Ok(outcome)
    }

    /// Evict an attempt's live session
    pub fn close(&self, session_id: &str) -> Result<bool, ProctorError> {
        self.sessions.close(session_id)
    }

    /// Read-only view of a live session
    pub fn snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ProctorError> {
        match self.sessions.get(session_id)? {
            Some(handle) => Ok(Some(lock_session(&handle, session_id)?.snapshot())),
            None => Ok(None),
        }
    }
}
