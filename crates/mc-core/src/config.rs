//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, storage, retention, cleanup cadence, node role
//! and external tools. Every section defaults sensibly so a completely empty
//! `{}` file is valid. The value is built once at startup and handed to each
//! component; nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::{Error, MediaKind, NodeLocation};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub formats: FormatsConfig,
    pub retention: RetentionConfig,
    pub cleanup: CleanupConfig,
    pub node: NodeConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.formats.audio.is_empty() && self.formats.video.is_empty() {
            warnings.push("formats lists are empty; every upload will be rejected".into());
        }

        if self.retention.hours == 0 {
            warnings.push("retention.hours is 0; jobs expire immediately".into());
        }

        for (name, secs) in [
            ("cleanup.routine_interval_secs", self.cleanup.routine_interval_secs),
            (
                "cleanup.storage_report_interval_secs",
                self.cleanup.storage_report_interval_secs,
            ),
            ("cleanup.emergency_interval_secs", self.cleanup.emergency_interval_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("{name} is 0; that sweep is disabled"));
            }
        }

        if self.cleanup.emergency_max_age_hours <= self.retention.hours {
            warnings.push(format!(
                "cleanup.emergency_max_age_hours ({}) should exceed retention.hours ({})",
                self.cleanup.emergency_max_age_hours, self.retention.hours
            ));
        }

        for (name, hours) in [
            ("retention.hours", self.retention.hours),
            ("cleanup.emergency_max_age_hours", self.cleanup.emergency_max_age_hours),
            (
                "cleanup.emergency_min_idle_secs",
                self.cleanup.emergency_min_idle_secs / 3600,
            ),
        ] {
            if hours > MAX_WINDOW_HOURS {
                warnings.push(format!(
                    "{name} exceeds the {MAX_WINDOW_HOURS}h limit and will be rejected"
                ));
            }
        }

        if self.node.peer_url.trim().is_empty() {
            warnings.push("node.peer_url is empty; peer notifications will fail".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Upper bound for every configured time window, roughly a century.
pub const MAX_WINDOW_HOURS: u64 = 100 * 365 * 24;

fn bounded_window(name: &str, secs: u64) -> Result<chrono::Duration> {
    if secs / 3600 > MAX_WINDOW_HOURS {
        return Err(Error::Validation(format!(
            "{name} exceeds the {MAX_WINDOW_HOURS}h limit"
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| Error::Validation(format!("{name} is out of range")))
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            db_path: PathBuf::from("video_converter.db"),
        }
    }
}

/// Artifact directories and upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub original_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            original_dir: PathBuf::from("uploads/original"),
            converted_dir: PathBuf::from("uploads/converted"),
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Accepted file extensions, split by media kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatsConfig {
    pub audio: Vec<String>,
    pub video: Vec<String>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            audio: ["mp3", "wav", "mp4"].map(String::from).to_vec(),
            video: ["mp4", "avi", "mpeg", "mov", "flv", "webm", "mkv"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl FormatsConfig {
    /// Whether `ext` (case-insensitive) is an accepted format of any kind.
    pub fn is_allowed(&self, ext: &str) -> bool {
        self.media_kind(ext).is_some()
    }

    /// Classify an extension. Audio formats are checked first, so an
    /// extension listed under both kinds counts as audio.
    pub fn media_kind(&self, ext: &str) -> Option<MediaKind> {
        let ext = ext.to_ascii_lowercase();
        if self.audio.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Audio)
        } else if self.video.iter().any(|v| v.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// How long a job's data is kept after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { hours: 24 }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Result<chrono::Duration> {
        let secs = self.hours.checked_mul(3600).unwrap_or(u64::MAX);
        bounded_window("retention.hours", secs)
    }
}

/// Cadence and thresholds for the three cleanup sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub routine_interval_secs: u64,
    pub storage_report_interval_secs: u64,
    pub emergency_interval_secs: u64,
    pub emergency_max_age_hours: u64,
    /// A `processing` job is only reclaimed by the emergency sweep once it
    /// has gone this long without any store update.
    pub emergency_min_idle_secs: u64,
    pub run_on_startup: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            routine_interval_secs: 60 * 60,
            storage_report_interval_secs: 4 * 60 * 60,
            emergency_interval_secs: 7 * 24 * 60 * 60,
            emergency_max_age_hours: 48,
            emergency_min_idle_secs: 60 * 60,
            run_on_startup: true,
        }
    }
}

impl CleanupConfig {
    pub fn emergency_max_age(&self) -> Result<chrono::Duration> {
        let secs = self.emergency_max_age_hours.checked_mul(3600).unwrap_or(u64::MAX);
        bounded_window("cleanup.emergency_max_age_hours", secs)
    }

    pub fn emergency_min_idle(&self) -> Result<chrono::Duration> {
        bounded_window("cleanup.emergency_min_idle_secs", self.emergency_min_idle_secs)
    }
}

/// Role of this instance in the two-node deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: NodeLocation,
    /// Node recorded as holding the artifacts of jobs submitted here.
    /// Defaults to `role`; a worker fronted by the master sets `server_a`.
    pub artifact_location: Option<NodeLocation>,
    pub peer_url: String,
    pub peer_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeLocation::ServerA,
            artifact_location: None,
            peer_url: "http://localhost:5001".into(),
            peer_timeout_secs: 30,
        }
    }
}

impl NodeConfig {
    pub fn artifact_location(&self) -> NodeLocation {
        self.artifact_location.unwrap_or(self.role)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// Human-readable name for log lines.
    pub fn display_name(&self) -> &'static str {
        match self.role {
            NodeLocation::ServerA => "Server A (Master)",
            NodeLocation::ServerB => "Server B (Worker)",
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub transcode_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            transcode_timeout_secs: 300,
        }
    }
}

impl ToolsConfig {
    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }
}
