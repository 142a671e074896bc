use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the heartbeat destination.
pub const OUTPUT_TARGET_ENV: &str = "OUTPUT_TARGET";

/// Destination used when neither the config file nor the environment names one.
pub const DEFAULT_TARGET: &str = "/tmp/progress.txt";

/// Top-level configuration loaded from heartbeat.toml.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct AgentConfig {
    pub reporter: ReporterConfig,
    pub status: StatusConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReporterConfig {
    pub target: PathBuf,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    pub stale_after_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServeConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from(DEFAULT_TARGET),
            interval_ms: 1000,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 5000,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 8421,
        }
    }
}

impl ReporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl StatusConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl ServeConfig {
    /// `bind:port` as accepted by `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Base URL a local client should use to reach the exporter.
    pub fn local_url(&self) -> String {
        let host = if self.bind == "0.0.0.0" || self.bind == "::" {
            "127.0.0.1"
        } else {
            self.bind.as_str()
        };
        format!("http://{}:{}", host, self.port)
    }
}

impl AgentConfig {
    /// Load config from `path`. A missing file yields defaults; an unreadable
    /// or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply the `OUTPUT_TARGET` value, if any. Empty values are ignored.
    pub fn apply_output_target(&mut self, value: Option<String>) {
        if let Some(target) = value.filter(|v| !v.trim().is_empty()) {
            self.reporter.target = PathBuf::from(target);
        }
    }

    /// Reject settings the reporter or exporter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reporter.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reporter.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.status.stale_after_ms == 0 {
            return Err(ConfigError::Invalid(
                "status.stale_after_ms must be greater than 0".to_string(),
            ));
        }
        if self.reporter.target.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "reporter.target must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors from loading or validating the config.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
