//! Repository Implementation

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use proctor::{CalibrationBaseline, ViolationEvent, ViolationKind};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::records::{AttemptRow, ViolationRecord};
use crate::{AttemptRecord, AttemptSettings, AttemptStatus, ProctoringStatus, StorageError, ViolationTally};

/// Durable violation count from which an attempt is flagged `warning`
pub const STATUS_WARNING_THRESHOLD: u32 = 3;

const AUTO_TERMINATED: &str = "AUTO_TERMINATED";

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS attempts (
        attempt_id TEXT PRIMARY KEY,
        max_warnings INTEGER NOT NULL,
        auto_submit_threshold INTEGER NOT NULL,
        proctoring_enabled INTEGER NOT NULL DEFAULT 1,
        calibration_completed INTEGER NOT NULL DEFAULT 0,
        total_violations INTEGER NOT NULL DEFAULT 0,
        proctoring_status TEXT NOT NULL DEFAULT 'active',
        submitted INTEGER NOT NULL DEFAULT 0,
        updated_at_ms INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS calibrations (
        attempt_id TEXT PRIMARY KEY REFERENCES attempts(attempt_id),
        yaw REAL NOT NULL,
        pitch REAL NOT NULL,
        roll REAL NOT NULL,
        frame_count INTEGER NOT NULL,
        calibrated_at_ms INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        attempt_id TEXT NOT NULL REFERENCES attempts(attempt_id),
        violation_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        message TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        yaw REAL,
        pitch REAL,
        roll REAL,
        deviation_yaw REAL,
        deviation_pitch REAL,
        deviation_roll REAL,
        faces_detected INTEGER NOT NULL DEFAULT 0
    )",
];

const SELECT_ATTEMPT: &str = "SELECT attempt_id, max_warnings, auto_submit_threshold, proctoring_enabled, calibration_completed, \
     total_violations, proctoring_status, submitted, updated_at_ms FROM attempts WHERE attempt_id = ?";

const INSERT_VIOLATION: &str = "INSERT INTO violations (attempt_id, violation_type, severity, message, timestamp_ms, \
     yaw, pitch, roll, deviation_yaw, deviation_pitch, deviation_roll, faces_detected) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Status after one more durable violation
fn next_status(current: ProctoringStatus, kind: ViolationKind, total: u32) -> ProctoringStatus {
    // terminated is sticky
    if kind == ViolationKind::Terminate || current == ProctoringStatus::Terminated {
        ProctoringStatus::Terminated
    } else if total >= STATUS_WARNING_THRESHOLD {
        ProctoringStatus::Warning
    } else {
        current
    }
}

/// Repository over a SQLite pool
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Connect to `url` (created if missing) and apply the schema
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Opening violation log at {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self, StorageError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Violation log schema ready");
        Ok(())
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Liveness probe
    pub async fn health_check(&self) -> Result<bool, StorageError> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    /// Insert or update an attempt's exam settings
    pub async fn register_attempt(&self, settings: &AttemptSettings) -> Result<AttemptRecord, StorageError> {
        sqlx::query(
            "INSERT INTO attempts (attempt_id, max_warnings, auto_submit_threshold, proctoring_enabled, updated_at_ms) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(attempt_id) DO UPDATE SET \
             max_warnings = excluded.max_warnings, \
             auto_submit_threshold = excluded.auto_submit_threshold, \
             proctoring_enabled = excluded.proctoring_enabled, \
             updated_at_ms = excluded.updated_at_ms",
        )
        .bind(&settings.attempt_id)
        .bind(settings.max_warnings as i64)
        .bind(settings.auto_submit_threshold as i64)
        .bind(settings.proctoring_enabled)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        info!(
            attempt = %settings.attempt_id,
            max_warnings = settings.max_warnings,
            auto_submit = settings.auto_submit_threshold,
            enabled = settings.proctoring_enabled,
            "Attempt registered"
        );
        self.attempt(&settings.attempt_id).await
    }

    /// Existing attempt, or a new one with `defaults`
    pub async fn ensure_attempt(&self, defaults: &AttemptSettings) -> Result<AttemptRecord, StorageError> {
        sqlx::query(
            "INSERT OR IGNORE INTO attempts \
             (attempt_id, max_warnings, auto_submit_threshold, proctoring_enabled, updated_at_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&defaults.attempt_id)
        .bind(defaults.max_warnings as i64)
        .bind(defaults.auto_submit_threshold as i64)
        .bind(defaults.proctoring_enabled)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        self.attempt(&defaults.attempt_id).await
    }

    pub async fn attempt(&self, attempt_id: &str) -> Result<AttemptRecord, StorageError> {
        let row: Option<AttemptRow> = sqlx::query_as(SELECT_ATTEMPT)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StorageError::NotFound(attempt_id.to_string()))?
            .try_into()
    }

    /// Store the baseline and mark the attempt calibrated and active
    pub async fn record_calibration(
        &self,
        attempt_id: &str,
        baseline: &CalibrationBaseline,
    ) -> Result<(), StorageError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE attempts SET calibration_completed = 1, proctoring_status = 'active', updated_at_ms = ? \
             WHERE attempt_id = ?",
        )
        .bind(now)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound(attempt_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO calibrations (attempt_id, yaw, pitch, roll, frame_count, calibrated_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(attempt_id) DO UPDATE SET \
             yaw = excluded.yaw, pitch = excluded.pitch, roll = excluded.roll, \
             frame_count = excluded.frame_count, calibrated_at_ms = excluded.calibrated_at_ms",
        )
        .bind(attempt_id)
        .bind(baseline.pose.yaw as f64)
        .bind(baseline.pose.pitch as f64)
        .bind(baseline.pose.roll as f64)
        .bind(baseline.frame_count as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(attempt = %attempt_id, "Calibration stored");
        Ok(())
    }

    /// Log a scored violation and update the durable counters.
    ///
    /// Crossing the attempt's auto-submit threshold submits the attempt and
    /// logs an extra `AUTO_TERMINATED` record that does not count itself.
    pub async fn record_violation(
        &self,
        attempt_id: &str,
        event: &ViolationEvent,
    ) -> Result<ViolationTally, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock before the counters are
        // read, so concurrent recorders queue instead of failing the upgrade.
        let counters: Option<(i64, String, bool, i64)> = sqlx::query_as(
            "UPDATE attempts SET total_violations = total_violations + 1, updated_at_ms = ? \
             WHERE attempt_id = ? \
             RETURNING total_violations, proctoring_status, submitted, auto_submit_threshold",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (total, current, already_submitted, auto_submit_threshold) =
            counters.ok_or_else(|| StorageError::NotFound(attempt_id.to_string()))?;
        let total = total.max(0) as u32;
        let current = ProctoringStatus::parse(&current)?;

        let pose = event.pose;
        let deviation = event.deviation;
        sqlx::query(INSERT_VIOLATION)
            .bind(attempt_id)
            .bind(event.kind.as_str())
            .bind(event.severity.as_str())
            .bind(&event.message)
            .bind(event.timestamp.timestamp_millis())
            .bind(pose.map(|p| p.yaw as f64))
            .bind(pose.map(|p| p.pitch as f64))
            .bind(pose.map(|p| p.roll as f64))
            .bind(deviation.map(|d| d.yaw as f64))
            .bind(deviation.map(|d| d.pitch as f64))
            .bind(deviation.map(|d| d.roll as f64))
            .bind(event.faces_detected as i64)
            .execute(&mut *tx)
            .await?;

        let mut status = next_status(current, event.kind, total);
        let mut submitted = already_submitted;
        let auto_submitted = !submitted && total as i64 >= auto_submit_threshold;

        if auto_submitted {
            submitted = true;
            status = ProctoringStatus::Terminated;
            sqlx::query(INSERT_VIOLATION)
                .bind(attempt_id)
                .bind(AUTO_TERMINATED)
                .bind("critical")
                .bind("Exam auto-terminated due to excessive violations")
                .bind(Utc::now().timestamp_millis())
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(None::<f64>)
                .bind(0i64)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE attempts SET proctoring_status = ?, submitted = ? WHERE attempt_id = ?")
            .bind(status.as_str())
            .bind(submitted)
            .bind(attempt_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if auto_submitted {
            warn!(attempt = %attempt_id, total, "Attempt auto-submitted after excessive violations");
        } else {
            debug!(attempt = %attempt_id, kind = event.kind.as_str(), total, "Violation recorded");
        }

        Ok(ViolationTally {
            total_violations: total,
            proctoring_status: status,
            submitted,
            auto_submitted,
        })
    }

    /// Set the durable status to `terminated` without logging a violation
    pub async fn mark_terminated(&self, attempt_id: &str) -> Result<(), StorageError> {
        let updated = sqlx::query(
            "UPDATE attempts SET proctoring_status = 'terminated', updated_at_ms = ? WHERE attempt_id = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound(attempt_id.to_string()));
        }
        warn!(attempt = %attempt_id, "Attempt marked terminated");
        Ok(())
    }

    /// Newest violations first
    pub async fn recent_violations(&self, attempt_id: &str, limit: u32) -> Result<Vec<ViolationRecord>, StorageError> {
        let rows: Vec<ViolationRecord> = sqlx::query_as(
            "SELECT id, attempt_id, violation_type, severity, message, timestamp_ms, yaw, pitch, roll, \
             deviation_yaw, deviation_pitch, deviation_roll, faces_detected \
             FROM violations WHERE attempt_id = ? ORDER BY timestamp_ms DESC, id DESC LIMIT ?",
        )
        .bind(attempt_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Durable proctoring status with the most recent violations
    pub async fn status(&self, attempt_id: &str, recent_limit: u32) -> Result<AttemptStatus, StorageError> {
        let attempt = self.attempt(attempt_id).await?;
        let recent_violations = self.recent_violations(attempt_id, recent_limit).await?;
        Ok(AttemptStatus {
            calibration_completed: attempt.calibration_completed,
            total_violations: attempt.total_violations,
            proctoring_status: attempt.proctoring_status,
            submitted: attempt.submitted,
            recent_violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proctor::{HeadPose, PoseDeviation, Severity};

    fn settings(id: &str, auto_submit_threshold: u32) -> AttemptSettings {
        AttemptSettings {
            attempt_id: id.to_string(),
            max_warnings: 3,
            auto_submit_threshold,
            proctoring_enabled: true,
        }
    }

    fn event(kind: ViolationKind, offset_ms: i64) -> ViolationEvent {
        ViolationEvent {
            kind,
            severity: Severity::High,
            message: format!("{} event", kind.as_str()),
            pose: Some(HeadPose::new(40.0, 1.0, -2.0)),
            deviation: Some(PoseDeviation {
                yaw: 40.0,
                pitch: 1.0,
                roll: 2.0,
                center_shift: 0.0,
            }),
            faces_detected: 1,
            warning_count: 1,
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    fn baseline() -> CalibrationBaseline {
        CalibrationBaseline {
            pose: HeadPose::new(1.0, -2.0, 0.5),
            center: (320.0, 240.0),
            size: (200.0, 220.0),
            frame_count: 20,
        }
    }

    #[tokio::test]
    async fn test_register_and_update_attempt() {
        let repo = Repository::in_memory().await.unwrap();
        let record = repo.register_attempt(&settings("a", 15)).await.unwrap();
        assert_eq!(record.proctoring_status, ProctoringStatus::Active);
        assert_eq!(record.total_violations, 0);
        assert!(!record.calibration_completed);

        let record = repo.register_attempt(&settings("a", 4)).await.unwrap();
        assert_eq!(record.auto_submit_threshold, 4);
        assert!(repo.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_attempt_keeps_existing_settings() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 7)).await.unwrap();

        let record = repo.ensure_attempt(&settings("a", 15)).await.unwrap();
        assert_eq!(record.auto_submit_threshold, 7);

        let fresh = repo.ensure_attempt(&settings("b", 15)).await.unwrap();
        assert_eq!(fresh.auto_submit_threshold, 15);
    }

    #[tokio::test]
    async fn test_missing_attempt_is_not_found() {
        let repo = Repository::in_memory().await.unwrap();
        assert!(matches!(repo.attempt("ghost").await, Err(StorageError::NotFound(_))));
        assert!(matches!(
            repo.record_violation("ghost", &event(ViolationKind::Warning, 0)).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            repo.record_calibration("ghost", &baseline()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_calibration_marks_attempt() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 15)).await.unwrap();
        repo.record_calibration("a", &baseline()).await.unwrap();
        // recalibration upserts
        repo.record_calibration("a", &baseline()).await.unwrap();

        let status = repo.status("a", 10).await.unwrap();
        assert!(status.calibration_completed);
        assert_eq!(status.proctoring_status, ProctoringStatus::Active);
    }

    #[tokio::test]
    async fn test_status_follows_durable_count() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 15)).await.unwrap();

        let first = repo.record_violation("a", &event(ViolationKind::Warning, 0)).await.unwrap();
        assert_eq!(first.total_violations, 1);
        assert_eq!(first.proctoring_status, ProctoringStatus::Active);

        repo.record_violation("a", &event(ViolationKind::NoFace, 1)).await.unwrap();
        let third = repo.record_violation("a", &event(ViolationKind::MultipleFaces, 2)).await.unwrap();
        assert_eq!(third.proctoring_status, ProctoringStatus::Warning);

        let terminated = repo.record_violation("a", &event(ViolationKind::Terminate, 3)).await.unwrap();
        assert_eq!(terminated.proctoring_status, ProctoringStatus::Terminated);
        assert!(!terminated.submitted);

        let after = repo.record_violation("a", &event(ViolationKind::Warning, 4)).await.unwrap();
        assert_eq!(after.proctoring_status, ProctoringStatus::Terminated);
    }

    #[tokio::test]
    async fn test_auto_submit_fires_once() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 2)).await.unwrap();

        let first = repo.record_violation("a", &event(ViolationKind::Warning, 0)).await.unwrap();
        assert!(!first.auto_submitted);

        let second = repo.record_violation("a", &event(ViolationKind::Warning, 1)).await.unwrap();
        assert!(second.auto_submitted);
        assert!(second.submitted);
        assert_eq!(second.proctoring_status, ProctoringStatus::Terminated);

        let third = repo.record_violation("a", &event(ViolationKind::Warning, 2)).await.unwrap();
        assert!(!third.auto_submitted);
        assert!(third.submitted);

        let logged = repo.recent_violations("a", 50).await.unwrap();
        let auto: Vec<_> = logged.iter().filter(|v| v.violation_type == AUTO_TERMINATED).collect();
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].severity, "critical");
        assert_eq!(repo.attempt("a").await.unwrap().total_violations, 3);
    }

    #[tokio::test]
    async fn test_recent_violations_newest_first() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 15)).await.unwrap();
        repo.register_attempt(&settings("b", 15)).await.unwrap();

        for offset in [0, 2000, 1000] {
            repo.record_violation("a", &event(ViolationKind::Warning, offset)).await.unwrap();
        }
        repo.record_violation("b", &event(ViolationKind::NoFace, 5000)).await.unwrap();

        let recent = repo.recent_violations("a", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp_ms > recent[1].timestamp_ms);
        assert!(recent.iter().all(|v| v.attempt_id == "a"));
        assert_eq!(recent[0].deviation_yaw, Some(40.0));
        assert_eq!(recent[0].faces_detected, 1);
    }

    #[tokio::test]
    async fn test_proctoring_toggle_is_stored() {
        let repo = Repository::in_memory().await.unwrap();
        let fresh = repo.ensure_attempt(&settings("a", 15)).await.unwrap();
        assert!(fresh.proctoring_enabled);

        let disabled = AttemptSettings {
            proctoring_enabled: false,
            ..settings("a", 15)
        };
        assert!(!repo.register_attempt(&disabled).await.unwrap().proctoring_enabled);
        // ensure never overrides a registered attempt
        assert!(!repo.ensure_attempt(&settings("a", 15)).await.unwrap().proctoring_enabled);
    }

    #[tokio::test]
    async fn test_mark_terminated() {
        let repo = Repository::in_memory().await.unwrap();
        repo.register_attempt(&settings("a", 15)).await.unwrap();
        repo.mark_terminated("a").await.unwrap();

        let record = repo.attempt("a").await.unwrap();
        assert_eq!(record.proctoring_status, ProctoringStatus::Terminated);
        assert_eq!(record.total_violations, 0);
        assert!(!record.submitted);
        assert!(matches!(repo.mark_terminated("ghost").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_violations_are_all_counted() {
        let path = std::env::temp_dir().join(format!(
            "violation-log-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let url = format!("sqlite://{}", path.display());
        let repo = Repository::connect(&url, 4).await.unwrap();
        repo.register_attempt(&settings("a", 100)).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.record_violation("a", &event(ViolationKind::Warning, i)).await })
            })
            .collect();
        let mut totals = Vec::new();
        for task in tasks {
            totals.push(task.await.unwrap().unwrap().total_violations);
        }
        totals.sort_unstable();

        assert_eq!(totals, (1..=16).collect::<Vec<u32>>());
        assert_eq!(repo.attempt("a").await.unwrap().total_violations, 16);
        repo.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_next_status_rule() {
        use ProctoringStatus::*;
        assert_eq!(next_status(Active, ViolationKind::Warning, 2), Active);
        assert_eq!(next_status(Active, ViolationKind::NoFace, 3), Warning);
        assert_eq!(next_status(Warning, ViolationKind::Terminate, 4), Terminated);
        assert_eq!(next_status(Terminated, ViolationKind::Warning, 9), Terminated);
    }
}
