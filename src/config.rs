//! Agent configuration loaded from TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game::LauncherKind;

/// Agent configuration, loaded from TOML. Every field has a default so an
/// empty (or missing) file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Interface the per-session websocket listener binds to.
    pub bind_host: String,
    /// Host name peers use to reach this agent. Defaults to the system
    /// hostname.
    pub public_host: Option<String>,
    pub ws_port: u16,
    pub video_signalling_port: u16,
    pub audio_signalling_port: u16,

    pub redis_url: String,
    /// List the broker pops admission requests from.
    pub queue_key: String,
    /// Lifetime of a published reply; matches how long requesters wait.
    pub reply_ttl_secs: u64,

    pub games_repo_path: PathBuf,
    pub working_folder_path: PathBuf,
    pub saves_path: PathBuf,

    pub timings: Timings,
    pub streaming: StreamingConfig,

    /// Launcher manifest, keyed by game identifier.
    pub games: HashMap<String, GameEntry>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cloudplay");
        Self {
            bind_host: "0.0.0.0".into(),
            public_host: None,
            ws_port: 8765,
            video_signalling_port: 8443,
            audio_signalling_port: 8444,
            redis_url: "redis://127.0.0.1:6379".into(),
            queue_key: "sessions".into(),
            reply_ttl_secs: 60,
            games_repo_path: data.join("repo"),
            working_folder_path: data.join("games"),
            saves_path: data.join("saves"),
            timings: Timings::default(),
            streaming: StreamingConfig::default(),
            games: HashMap::new(),
        }
    }
}

/// Timeouts and intervals, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub start_timeout_ms: u64,
    pub connect_grace_ms: u64,
    pub window_timeout_ms: u64,
    pub window_poll_ms: u64,
    pub queue_backoff_ms: u64,
    pub latency_warn_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5_000,
            connect_grace_ms: 10_000,
            window_timeout_ms: 10_000,
            window_poll_ms: 100,
            queue_backoff_ms: 10_000,
            latency_warn_ms: 100,
        }
    }
}

impl Timings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.connect_grace_ms)
    }

    pub fn window_timeout(&self) -> Duration {
        Duration::from_millis(self.window_timeout_ms)
    }

    pub fn window_poll(&self) -> Duration {
        Duration::from_millis(self.window_poll_ms)
    }

    pub fn queue_backoff(&self) -> Duration {
        Duration::from_millis(self.queue_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// `gst-launch-1.0` binary.
    pub gst_launch: PathBuf,
    /// Video bitrate in kbit/s.
    pub video_bitrate: u32,
    pub framerate: u32,
    /// Audio bitrate in bit/s.
    pub audio_bitrate: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            gst_launch: PathBuf::from(if cfg!(windows) {
                "gst-launch-1.0.exe"
            } else {
                "gst-launch-1.0"
            }),
            video_bitrate: 1000,
            framerate: 60,
            audio_bitrate: 96_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameEntry {
    pub launcher: LauncherKind,
}

impl AgentConfig {
    /// Load config from a TOML file path. A missing file yields defaults.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_port == 0 {
            return Err(ConfigError::Invalid("ws_port must not be 0".into()));
        }
        if self.timings.window_poll_ms == 0 {
            return Err(ConfigError::Invalid("timings.window_poll_ms must not be 0".into()));
        }
        if self.timings.window_poll_ms > self.timings.window_timeout_ms {
            return Err(ConfigError::Invalid(
                "timings.window_poll_ms must not exceed timings.window_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn public_host(&self) -> String {
        resolve_hostname(self.public_host.as_deref())
    }

    pub fn ws_endpoint(&self) -> String {
        format!("ws://{}:{}", self.public_host(), self.ws_port)
    }

    pub fn video_signalling_endpoint(&self) -> String {
        format!("ws://{}:{}", self.public_host(), self.video_signalling_port)
    }

    pub fn audio_signalling_endpoint(&self) -> String {
        format!("ws://{}:{}", self.public_host(), self.audio_signalling_port)
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cloudplay")
        .join("agent.toml")
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {1}", .0.display())]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config {}: {1}", .0.display())]
    ParseFailed(PathBuf, #[source] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Warn if the config file is world-readable; the Redis URL may carry
/// credentials.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain credentials -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

/// Use the override if present, otherwise the system hostname.
pub fn resolve_hostname(configured: Option<&str>) -> String {
    if let Some(host) = configured {
        return host.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
