//! Per-attempt session registry
//!
//! One state machine per attempt, each behind its own lock, so frames of
//! different attempts never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::config::ProctorConfig;
use crate::machine::ViolationStateMachine;
use crate::ProctorError;

/// Shared handle to one attempt's state machine
pub type SessionHandle = Arc<Mutex<ViolationStateMachine>>;

/// Per-attempt settings fixed when the session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_warnings: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { max_warnings: 3 }
    }
}

/// Storage seam for live sessions
pub trait SessionStore: Send + Sync {
    /// Existing session or a fresh uncalibrated one. Atomic per id.
    fn get_or_create(&self, session_id: &str, settings: SessionSettings) -> Result<SessionHandle, ProctorError>;

    fn get(&self, session_id: &str) -> Result<Option<SessionHandle>, ProctorError>;

    /// Drop a session. Returns whether it existed.
    fn close(&self, session_id: &str) -> Result<bool, ProctorError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`SessionStore`]
pub struct SessionRegistry {
    config: Arc<ProctorConfig>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(config: Arc<ProctorConfig>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Arc<ProctorConfig> {
        &self.config
    }
}

impl SessionStore for SessionRegistry {
    fn get_or_create(&self, session_id: &str, settings: SessionSettings) -> Result<SessionHandle, ProctorError> {
        if let Some(handle) = self.get(session_id)? {
            return Ok(handle);
        }

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProctorError::LockPoisoned("session registry".into()))?;
        // Re-check under the write lock; another caller may have won the race
        let handle = sessions.entry(session_id.to_string()).or_insert_with(|| {
            info!(session = %session_id, max_warnings = settings.max_warnings, "Session created");
            Arc::new(Mutex::new(ViolationStateMachine::new(
                session_id,
                Arc::clone(&self.config),
                settings.max_warnings,
            )))
        });
        Ok(Arc::clone(handle))
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionHandle>, ProctorError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| ProctorError::LockPoisoned("session registry".into()))?;
        Ok(sessions.get(session_id).cloned())
    }

    fn close(&self, session_id: &str) -> Result<bool, ProctorError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProctorError::LockPoisoned("session registry".into()))?;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            debug!(session = %session_id, "Session closed");
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}
