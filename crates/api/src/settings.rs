//! Service configuration
//!
//! Layered: built-in defaults, then an optional TOML file (`PROCTOR_CONFIG`
//! or `./proctor.toml`), then `PROCTOR__SECTION__KEY` environment variables.

use std::path::PathBuf;

use ::config::{Config, Environment, File, FileFormat};
use proctor::{FaceFilter, ProctorConfig};
use serde::{Deserialize, Serialize};

use crate::error::StartupError;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PROCTOR_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "proctor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound for request bodies (calibration batches are large)
    pub body_limit_bytes: usize,
    /// Largest single encoded frame
    pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 64 * 1024 * 1024,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://proctor.db".to_string(),
            max_connections: 4,
        }
    }
}

/// Model files and their network input sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub face_detector: PathBuf,
    pub face_input_width: u32,
    pub face_input_height: u32,
    pub head_pose: PathBuf,
    pub pose_input_width: u32,
    pub pose_input_height: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("models/face-detection-adas-0001.onnx"),
            face_input_width: 672,
            face_input_height: 384,
            head_pose: PathBuf::from("models/head-pose-estimation-adas-0001.onnx"),
            pose_input_width: 60,
            pose_input_height: 60,
        }
    }
}

/// Per-exam defaults applied to attempts that were never registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamSettings {
    pub max_warnings: u32,
    pub auto_submit_threshold: u32,
    /// Violations listed by the status endpoint
    pub recent_violations: u32,
    pub proctoring_enabled: bool,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            max_warnings: 3,
            auto_submit_threshold: 15,
            recent_violations: 10,
            proctoring_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub models: ModelSettings,
    pub proctor: ProctorConfig,
    pub exam: ExamSettings,
    pub logging: LoggingSettings,
}

impl ServiceConfig {
    /// Load from the default file location and the process environment
    pub fn load() -> Result<Self, StartupError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(explicit)
    }

    /// Load with an explicit config file; the file must then exist
    pub fn load_from(path: Option<PathBuf>) -> Result<Self, StartupError> {
        let file = match &path {
            Some(path) => File::from(path.as_path()).format(FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        let loaded: ServiceConfig = Config::builder()
            .add_source(Config::try_from(&ServiceConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix("PROCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        self.proctor
            .validate()
            .map_err(|e| StartupError::Config(e.to_string()))?;

        if self.exam.max_warnings == 0 {
            return Err(StartupError::Config("exam.max_warnings must be at least 1".into()));
        }
        if self.exam.auto_submit_threshold == 0 {
            return Err(StartupError::Config(
                "exam.auto_submit_threshold must be at least 1".into(),
            ));
        }
        if self.server.max_frame_bytes == 0 || self.server.max_frame_bytes > self.server.body_limit_bytes {
            return Err(StartupError::Config(
                "server.max_frame_bytes must be positive and within body_limit_bytes".into(),
            ));
        }
        Ok(())
    }

    /// Face filter derived from the proctoring thresholds
    pub fn face_filter(&self) -> FaceFilter {
        FaceFilter {
            min_confidence: self.proctor.min_face_confidence,
            min_area_ratio: self.proctor.min_face_area_ratio,
        }
    }
}
