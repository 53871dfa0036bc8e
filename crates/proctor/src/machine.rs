//! Per-attempt violation state machine
//!
//! `UNCALIBRATED -> ACTIVE -> TERMINATED`. Frames are classified, debounced
//! against a deviation-run timer, rate-limited by a warning cooldown and
//! accumulated against the session's warning ceiling. TERMINATED is
//! absorbing until the session is calibrated again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationBaseline;
use crate::classifier::{DeviationClassifier, DeviationLevel, PoseDeviation};
use crate::config::ProctorConfig;
use crate::detector::{FaceBox, HeadPose};
use crate::outcome::{ProctorOutcome, ProctorStatus, Severity, ViolationEvent, ViolationKind};

/// Per-frame measurement fed to the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameObservation {
    pub faces_detected: usize,
    /// Largest face, when any face was found
    pub face: Option<FaceBox>,
    /// Pose of the largest face
    pub pose: Option<HeadPose>,
}

impl FrameObservation {
    pub fn no_face() -> Self {
        Self::default()
    }

    pub fn faces(faces_detected: usize, face: FaceBox, pose: HeadPose) -> Self {
        Self {
            faces_detected,
            face: Some(face),
            pose: Some(pose),
        }
    }

    /// Faces were found but the largest one could not be cropped for pose
    /// estimation
    pub fn unusable_region(faces_detected: usize, face: FaceBox) -> Self {
        Self {
            faces_detected,
            face: Some(face),
            pose: None,
        }
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub calibrated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<CalibrationBaseline>,
    pub warning_count: u32,
    pub max_warnings: u32,
    pub terminated: bool,
}

/// Mutable per-attempt state
#[derive(Debug, Clone)]
struct SessionState {
    baseline: Option<CalibrationBaseline>,
    /// Only grows until the next calibration
    warning_count: u32,
    /// One-way until the next calibration
    terminated: bool,
    last_face_seen_at: Instant,
    deviation_run_started_at: Option<Instant>,
    last_warning_issued_at: Option<Instant>,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            baseline: None,
            warning_count: 0,
            terminated: false,
            last_face_seen_at: now,
            deviation_run_started_at: None,
            last_warning_issued_at: None,
        }
    }
}

/// What triggered a warning
#[derive(Debug, Clone, Copy)]
enum Escalation {
    NoFace,
    MultipleFaces,
    Deviation { level: DeviationLevel, elapsed: Duration },
}

impl Escalation {
    fn reason(&self) -> String {
        match self {
            Escalation::NoFace => "No face detected for too long".to_string(),
            Escalation::MultipleFaces => "Multiple faces detected in frame".to_string(),
            Escalation::Deviation { elapsed, .. } => {
                format!("Head deviation maintained for {:.1}s", elapsed.as_secs_f32())
            }
        }
    }

    fn kind(&self) -> ViolationKind {
        match self {
            Escalation::NoFace => ViolationKind::NoFace,
            Escalation::MultipleFaces => ViolationKind::MultipleFaces,
            Escalation::Deviation { .. } => ViolationKind::Warning,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Escalation::NoFace => Severity::Medium,
            Escalation::MultipleFaces => Severity::High,
            Escalation::Deviation { level: DeviationLevel::Hard, .. } => Severity::High,
            Escalation::Deviation { .. } => Severity::Medium,
        }
    }
}

/// Violation state machine for one exam attempt
#[derive(Debug)]
pub struct ViolationStateMachine {
    session_id: String,
    config: Arc<ProctorConfig>,
    classifier: DeviationClassifier,
    /// Session-local ceiling, fixed at creation
    max_warnings: u32,
    state: SessionState,
}

impl ViolationStateMachine {
    pub fn new(session_id: impl Into<String>, config: Arc<ProctorConfig>, max_warnings: u32) -> Self {
        let classifier = DeviationClassifier::new(config.thresholds);
        Self {
            session_id: session_id.into(),
            config,
            classifier,
            max_warnings: max_warnings.max(1),
            state: SessionState::new(Instant::now()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn warning_count(&self) -> u32 {
        self.state.warning_count
    }

    pub fn max_warnings(&self) -> u32 {
        self.max_warnings
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.state.baseline.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            calibrated: self.state.baseline.is_some(),
            baseline: self.state.baseline,
            warning_count: self.state.warning_count,
            max_warnings: self.max_warnings,
            terminated: self.state.terminated,
        }
    }

    /// Install a fresh baseline and reinitialize the whole session.
    ///
    /// This is also how a terminated session is reactivated.
    pub fn apply_calibration(&mut self, baseline: CalibrationBaseline, now: Instant) {
        let mut state = SessionState::new(now);
        state.baseline = Some(baseline);
        self.state = state;
        info!(session = %self.session_id, frames = baseline.frame_count, "Session calibrated");
    }

    /// Outcome for frames that need no inference: terminated or uncalibrated
    /// sessions. `None` means the frame must be analysed.
    pub fn precheck(&self) -> Option<ProctorOutcome> {
        if self.state.terminated {
            return Some(
                ProctorOutcome::new(ProctorStatus::Terminate, "Exam already terminated.")
                    .with_warning_count(self.state.warning_count),
            );
        }
        if self.state.baseline.is_none() {
            return Some(ProctorOutcome::error("Not calibrated yet"));
        }
        None
    }

    /// Turn one observation into an outcome
    pub fn process(&mut self, obs: &FrameObservation, now: Instant) -> ProctorOutcome {
        if let Some(outcome) = self.precheck() {
            return outcome;
        }

        let outcome = match obs.faces_detected {
            0 => self.on_no_face(now),
            _ if obs.face.is_some() && obs.pose.is_none() => self.on_unusable_region(obs, now),
            1 => self.on_single_face(obs, now),
            _ => self.on_multiple_faces(obs, now),
        };

        debug!(
            session = %self.session_id,
            status = outcome.status.as_str(),
            faces = obs.faces_detected,
            "Frame processed"
        );
        outcome.with_warning_count(self.state.warning_count)
    }

    fn cooldown_active(&self, now: Instant) -> bool {
        self.state
            .last_warning_issued_at
            .map_or(false, |at| now.saturating_duration_since(at) < self.config.warning_cooldown())
    }

    fn report_deviation(&self, obs: &FrameObservation) -> Option<PoseDeviation> {
        match (obs.pose, obs.face, self.state.baseline.as_ref()) {
            (Some(pose), Some(face), Some(baseline)) => Some(self.classifier.deviation(&pose, &face, baseline)),
            _ => None,
        }
    }

    fn on_no_face(&mut self, now: Instant) -> ProctorOutcome {
        let absent = now.saturating_duration_since(self.state.last_face_seen_at);
        if absent <= self.config.no_face_timeout() {
            return ProctorOutcome::new(ProctorStatus::NoFace, "Face temporarily not detected");
        }
        if self.cooldown_active(now) {
            return ProctorOutcome::new(ProctorStatus::NoFace, "Face not detected (cooldown active).");
        }
        self.issue_warning(Escalation::NoFace, &FrameObservation::no_face(), None, now)
    }

    fn on_unusable_region(&mut self, obs: &FrameObservation, now: Instant) -> ProctorOutcome {
        self.state.last_face_seen_at = now;
        ProctorOutcome::new(ProctorStatus::NoFace, "Face region invalid").with_faces(obs.faces_detected)
    }

    fn on_multiple_faces(&mut self, obs: &FrameObservation, now: Instant) -> ProctorOutcome {
        self.state.last_face_seen_at = now;
        let deviation = self.report_deviation(obs);

        if self.cooldown_active(now) {
            return ProctorOutcome::new(ProctorStatus::Normal, "Multiple faces detected (cooldown active).")
                .with_faces(obs.faces_detected)
                .with_pose(obs.pose, deviation);
        }
        self.issue_warning(Escalation::MultipleFaces, obs, deviation, now)
    }

    fn on_single_face(&mut self, obs: &FrameObservation, now: Instant) -> ProctorOutcome {
        let (Some(face), Some(pose)) = (obs.face, obs.pose) else {
            return ProctorOutcome::error("Face analysis incomplete").with_faces(obs.faces_detected);
        };
        self.state.last_face_seen_at = now;

        let alpha = self.config.baseline_adaptation_rate;
        let classifier = self.classifier;
        let Some(baseline) = self.state.baseline.as_mut() else {
            return ProctorOutcome::error("Not calibrated yet");
        };
        let classification = classifier.classify(&pose, &face, baseline);
        let deviation = Some(classification.deviation);

        if !classification.is_deviated() {
            self.state.deviation_run_started_at = None;
            baseline.adapt(&pose, alpha);
            return ProctorOutcome::new(ProctorStatus::Normal, "OK")
                .with_faces(1)
                .with_pose(Some(pose), deviation);
        }

        if self.cooldown_active(now) {
            return ProctorOutcome::new(ProctorStatus::Normal, "Minor movement detected (cooldown active).")
                .with_faces(1)
                .with_pose(Some(pose), deviation);
        }

        let Some(started) = self.state.deviation_run_started_at else {
            self.state.deviation_run_started_at = Some(now);
            return ProctorOutcome::new(ProctorStatus::Normal, "Movement detected, monitoring...")
                .with_faces(1)
                .with_pose(Some(pose), deviation);
        };

        let elapsed = now.saturating_duration_since(started);
        let required = if classification.is_hard() {
            self.config.hard_deviation_min()
        } else {
            self.config.soft_deviation_min()
        };

        if elapsed < required {
            let mut outcome = ProctorOutcome::new(
                ProctorStatus::Normal,
                format!("Movement detected ({:.1}s)...", elapsed.as_secs_f32()),
            )
            .with_faces(1)
            .with_pose(Some(pose), deviation);
            outcome.deviation_secs = Some(elapsed.as_secs_f32());
            return outcome;
        }

        self.state.deviation_run_started_at = None;
        let escalation = Escalation::Deviation {
            level: classification.level,
            elapsed,
        };
        let mut outcome = self.issue_warning(escalation, obs, deviation, now);
        outcome.deviation_secs = Some(elapsed.as_secs_f32());
        outcome
    }

    /// Shared terminal step: count the warning and decide on termination
    fn issue_warning(
        &mut self,
        escalation: Escalation,
        obs: &FrameObservation,
        deviation: Option<PoseDeviation>,
        now: Instant,
    ) -> ProctorOutcome {
        let reason = escalation.reason();
        self.state.warning_count += 1;
        self.state.last_warning_issued_at = Some(now);

        let (status, kind, severity, message) = if self.state.warning_count >= self.max_warnings {
            self.state.terminated = true;
            (
                ProctorStatus::Terminate,
                ViolationKind::Terminate,
                Severity::Critical,
                format!("Exam terminated. Reason: {}. Max warnings reached.", reason),
            )
        } else {
            (
                ProctorStatus::Warning,
                escalation.kind(),
                escalation.severity(),
                format!(
                    "Warning {}/{}: {}",
                    self.state.warning_count, self.max_warnings, reason
                ),
            )
        };

        if status == ProctorStatus::Terminate {
            warn!(session = %self.session_id, %reason, "Session terminated");
        } else {
            warn!(
                session = %self.session_id,
                count = self.state.warning_count,
                max = self.max_warnings,
                %reason,
                "Warning issued"
            );
        }

        let event = ViolationEvent {
            kind,
            severity,
            message: message.clone(),
            pose: obs.pose,
            deviation,
            faces_detected: obs.faces_detected,
            warning_count: self.state.warning_count,
            timestamp: Utc::now(),
        };

        let mut outcome = ProctorOutcome::new(status, message)
            .with_faces(obs.faces_detected)
            .with_pose(obs.pose, deviation)
            .with_warning_count(self.state.warning_count);
        outcome.event = Some(event);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FACE: FaceBox = FaceBox {
        x: 220.0,
        y: 130.0,
        width: 200.0,
        height: 220.0,
        confidence: 0.95,
    };

    fn baseline() -> CalibrationBaseline {
        CalibrationBaseline {
            pose: HeadPose { yaw: 0.0, pitch: 0.0, roll: 0.0 },
            center: (320.0, 240.0),
            size: (200.0, 220.0),
            frame_count: 20,
        }
    }

    fn calibrated(max_warnings: u32) -> (ViolationStateMachine, Instant) {
        let mut machine = ViolationStateMachine::new("attempt-1", Arc::new(ProctorConfig::default()), max_warnings);
        let t0 = Instant::now();
        machine.apply_calibration(baseline(), t0);
        (machine, t0)
    }

    fn pose(yaw: f32) -> FrameObservation {
        FrameObservation::faces(1, FACE, HeadPose::new(yaw, 0.0, 0.0))
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn test_uncalibrated_is_error_without_mutation() {
        let mut machine = ViolationStateMachine::new("a", Arc::new(ProctorConfig::default()), 3);
        let outcome = machine.process(&pose(40.0), Instant::now());

        assert_eq!(outcome.status, ProctorStatus::Error);
        assert_eq!(outcome.message, "Not calibrated yet");
        assert_eq!(machine.warning_count(), 0);
        assert!(!machine.is_terminated());
    }

    #[test]
    fn test_scenario_sustained_hard_yaw_warns_once() {
        let (mut machine, t0) = calibrated(3);

        let first = machine.process(&pose(40.0), at(t0, 100));
        assert_eq!(first.status, ProctorStatus::Normal);
        assert!(first.message.contains("monitoring"));

        let mid = machine.process(&pose(40.0), at(t0, 400));
        assert_eq!(mid.status, ProctorStatus::Normal);
        assert_eq!(mid.deviation_secs.map(|s| (s * 10.0).round()), Some(3.0));

        let warned = machine.process(&pose(40.0), at(t0, 700));
        assert_eq!(warned.status, ProctorStatus::Warning);
        assert!(warned.message.starts_with("Warning 1/3"), "{}", warned.message);
        assert_eq!(warned.warning_count, 1);

        let event = warned.event.unwrap();
        assert_eq!(event.kind, ViolationKind::Warning);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.deviation.unwrap().yaw, 40.0);
    }

    #[test]
    fn test_transient_deviation_is_tolerated() {
        let (mut machine, t0) = calibrated(3);

        assert_eq!(machine.process(&pose(40.0), at(t0, 100)).status, ProctorStatus::Normal);
        assert_eq!(machine.process(&pose(40.0), at(t0, 400)).status, ProctorStatus::Normal);
        assert_eq!(machine.process(&pose(0.0), at(t0, 500)).status, ProctorStatus::Normal);
        // the run restarts after the normal frame
        assert_eq!(machine.process(&pose(40.0), at(t0, 700)).status, ProctorStatus::Normal);
        assert_eq!(machine.warning_count(), 0);
    }

    #[test]
    fn test_soft_deviation_needs_longer_run() {
        let (mut machine, t0) = calibrated(3);

        machine.process(&pose(20.0), at(t0, 0));
        assert_eq!(machine.process(&pose(20.0), at(t0, 1000)).status, ProctorStatus::Normal);
        assert_eq!(machine.process(&pose(20.0), at(t0, 1999)).status, ProctorStatus::Normal);

        let warned = machine.process(&pose(20.0), at(t0, 2000));
        assert_eq!(warned.status, ProctorStatus::Warning);
        assert_eq!(warned.event.unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_cooldown_suppresses_second_warning() {
        let (mut machine, t0) = calibrated(5);

        machine.process(&pose(40.0), at(t0, 0));
        assert_eq!(machine.process(&pose(40.0), at(t0, 600)).status, ProctorStatus::Warning);

        // sustained deviation inside the 5s cooldown produces no warning
        for ms in (700..5600).step_by(100) {
            let outcome = machine.process(&pose(40.0), at(t0, ms));
            assert_eq!(outcome.status, ProctorStatus::Normal, "at {}ms", ms);
        }
        assert_eq!(machine.warning_count(), 1);

        // after the cooldown a new run must build up again
        assert_eq!(machine.process(&pose(40.0), at(t0, 5700)).status, ProctorStatus::Normal);
        assert_eq!(machine.process(&pose(40.0), at(t0, 6200)).status, ProctorStatus::Warning);
        assert_eq!(machine.warning_count(), 2);
    }

    #[test]
    fn test_scenario_no_face_grace_then_warning() {
        let (mut machine, t0) = calibrated(3);

        for ms in [500, 1000, 1500, 2000] {
            let outcome = machine.process(&FrameObservation::no_face(), at(t0, ms));
            assert_eq!(outcome.status, ProctorStatus::NoFace, "at {}ms", ms);
            assert_eq!(outcome.message, "Face temporarily not detected");
        }
        assert_eq!(machine.warning_count(), 0);

        let outcome = machine.process(&FrameObservation::no_face(), at(t0, 2500));
        assert_eq!(outcome.status, ProctorStatus::Warning);
        assert!(outcome.message.contains("No face detected for too long"));
        assert_eq!(outcome.event.unwrap().kind, ViolationKind::NoFace);
    }

    #[test]
    fn test_no_face_with_single_warning_ceiling_terminates() {
        let (mut machine, t0) = calibrated(1);

        for ms in [500, 1000, 1500, 2000] {
            machine.process(&FrameObservation::no_face(), at(t0, ms));
        }
        let outcome = machine.process(&FrameObservation::no_face(), at(t0, 2500));
        assert_eq!(outcome.status, ProctorStatus::Terminate);
        assert!(outcome.message.contains("Max warnings reached"));
        assert_eq!(outcome.event.unwrap().kind, ViolationKind::Terminate);
    }

    #[test]
    fn test_grace_period_does_not_touch_last_face() {
        let (mut machine, t0) = calibrated(3);
        machine.process(&pose(0.0), at(t0, 1000));

        // last real sighting at 1000ms; absences inside the grace window change nothing
        for ms in [1500, 2500, 3000] {
            assert_eq!(
                machine.process(&FrameObservation::no_face(), at(t0, ms)).status,
                ProctorStatus::NoFace
            );
        }
        assert_eq!(machine.state.last_face_seen_at, at(t0, 1000));
        assert_eq!(machine.process(&FrameObservation::no_face(), at(t0, 3001)).status, ProctorStatus::Warning);
    }

    #[test]
    fn test_scenario_multiple_faces_warn_immediately() {
        let (mut machine, t0) = calibrated(3);
        let obs = FrameObservation::faces(2, FACE, HeadPose::new(3.0, 1.0, 0.0));

        let outcome = machine.process(&obs, at(t0, 100));
        assert_eq!(outcome.status, ProctorStatus::Warning);
        assert_eq!(outcome.faces_detected, 2);
        assert!(outcome.pose.is_some());

        let event = outcome.event.unwrap();
        assert_eq!(event.kind, ViolationKind::MultipleFaces);
        assert_eq!(event.faces_detected, 2);
        assert_eq!(event.deviation.unwrap().yaw, 3.0);

        // subject to the shared cooldown
        assert_eq!(machine.process(&obs, at(t0, 200)).status, ProctorStatus::Normal);
        assert_eq!(machine.warning_count(), 1);
    }

    #[test]
    fn test_threshold_crossing_terminates_on_third() {
        let (mut machine, t0) = calibrated(3);
        let obs = FrameObservation::faces(3, FACE, HeadPose::default());

        assert_eq!(machine.process(&obs, at(t0, 0)).status, ProctorStatus::Warning);
        assert_eq!(machine.process(&obs, at(t0, 5000)).status, ProctorStatus::Warning);
        assert!(!machine.is_terminated());

        let third = machine.process(&obs, at(t0, 10_000));
        assert_eq!(third.status, ProctorStatus::Terminate);
        assert!(machine.is_terminated());
        assert_eq!(machine.warning_count(), 3);
    }

    #[test]
    fn test_termination_is_absorbing() {
        let (mut machine, t0) = calibrated(1);
        let obs = FrameObservation::faces(2, FACE, HeadPose::default());
        assert_eq!(machine.process(&obs, at(t0, 0)).status, ProctorStatus::Terminate);

        for (i, frame) in [obs, pose(0.0), FrameObservation::no_face(), pose(80.0)].iter().enumerate() {
            let outcome = machine.process(frame, at(t0, 10_000 + i as u64 * 10_000));
            assert_eq!(outcome.status, ProctorStatus::Terminate);
            assert_eq!(outcome.message, "Exam already terminated.");
            assert!(outcome.event.is_none());
        }
        assert_eq!(machine.warning_count(), 1);
    }

    #[test]
    fn test_recalibration_reactivates() {
        let (mut machine, t0) = calibrated(1);
        machine.process(&FrameObservation::faces(2, FACE, HeadPose::default()), at(t0, 0));
        assert!(machine.is_terminated());

        machine.apply_calibration(baseline(), at(t0, 1000));
        assert!(!machine.is_terminated());
        assert_eq!(machine.warning_count(), 0);
        assert_eq!(machine.process(&pose(0.0), at(t0, 1100)).status, ProctorStatus::Normal);
    }

    #[test]
    fn test_recalibration_clears_deviation_run() {
        let (mut machine, t0) = calibrated(3);
        machine.process(&pose(40.0), at(t0, 0));
        machine.apply_calibration(baseline(), at(t0, 100));

        // the earlier run start is gone, so this is a fresh first frame
        let outcome = machine.process(&pose(40.0), at(t0, 700));
        assert!(outcome.message.contains("monitoring"));
    }

    #[test]
    fn test_geometric_shift_counts_as_hard() {
        let (mut machine, t0) = calibrated(3);
        let mut shifted = FACE;
        shifted.x += 150.0;
        let obs = FrameObservation::faces(1, shifted, HeadPose::default());

        machine.process(&obs, at(t0, 0));
        assert_eq!(machine.process(&obs, at(t0, 500)).status, ProctorStatus::Warning);
    }

    #[test]
    fn test_normal_frames_adapt_baseline() {
        let (mut machine, t0) = calibrated(3);
        machine.process(&pose(10.0), at(t0, 0));
        let yaw = machine.baseline().unwrap().pose.yaw;
        assert!((yaw - 0.2).abs() < 1e-5);

        // deviated frames leave the baseline alone
        machine.process(&pose(40.0), at(t0, 100));
        assert_eq!(machine.baseline().unwrap().pose.yaw, yaw);
    }

    #[test]
    fn test_incomplete_single_face_observation_is_error() {
        let (mut machine, t0) = calibrated(3);
        let obs = FrameObservation {
            faces_detected: 1,
            face: None,
            pose: None,
        };
        assert_eq!(machine.process(&obs, at(t0, 0)).status, ProctorStatus::Error);
        assert_eq!(machine.warning_count(), 0);
    }

    #[test]
    fn test_unusable_face_region_is_no_face() {
        let (mut machine, t0) = calibrated(1);
        // the region still counts as a sighting for the no-face timer
        let outcome = machine.process(&FrameObservation::unusable_region(2, FACE), at(t0, 4_000));
        assert_eq!(outcome.status, ProctorStatus::NoFace);
        assert_eq!(outcome.message, "Face region invalid");
        assert_eq!(outcome.faces_detected, 2);
        assert!(outcome.event.is_none());

        let outcome = machine.process(&FrameObservation::no_face(), at(t0, 6_000));
        assert_eq!(outcome.message, "Face temporarily not detected");
        assert_eq!(machine.warning_count(), 0);
    }

    proptest! {
        #[test]
        fn adaptation_never_exceeds_alpha(
            observed in prop::collection::vec(-14.9f32..14.9, 1..40)
        ) {
            let (mut machine, t0) = calibrated(3);
            for (i, yaw) in observed.iter().enumerate() {
                let old = machine.baseline().unwrap().pose.yaw;
                machine.process(&pose(*yaw), at(t0, i as u64 * 10));
                let new = machine.baseline().unwrap().pose.yaw;
                let expected = old + 0.02 * (yaw - old);
                prop_assert!((new - expected).abs() < 1e-4);
                prop_assert!((new - old).abs() <= 0.02 * (yaw - old).abs() + 1e-4);
            }
        }

        #[test]
        fn warning_count_never_decreases(
            frames in prop::collection::vec((0usize..3, -60f32..60.0, 0u64..3000), 1..60)
        ) {
            let (mut machine, t0) = calibrated(4);
            let mut elapsed = 0u64;
            let mut last = 0;
            for (faces, yaw, step) in frames {
                elapsed += step;
                let obs = match faces {
                    0 => FrameObservation::no_face(),
                    n => FrameObservation::faces(n, FACE, HeadPose::new(yaw, 0.0, 0.0)),
                };
                let outcome = machine.process(&obs, at(t0, elapsed));
                prop_assert!(machine.warning_count() >= last);
                prop_assert!(machine.warning_count() <= machine.max_warnings());
                if machine.is_terminated() {
                    prop_assert_eq!(outcome.status, ProctorStatus::Terminate);
                }
                last = machine.warning_count();
            }
        }
    }
}
