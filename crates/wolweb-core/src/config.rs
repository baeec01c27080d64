//! Client configuration.
//!
//! The base URL is the only value a deployment normally has to set. It is
//! injected here rather than hard-coded so development and production can
//! point at different services.
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8951"
//! request_timeout_secs = 10
//!
//! [wake]
//! broadcast_addr = "192.168.1.255"
//!
//! [poll]
//! interval_ms = 3000
//! budget_ms = 5000
//!
//! [display]
//! dwell_ms = 200
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::BoardOptions;
use crate::client::{HttpTransport, normalize_base_url};
use crate::poller::PollOptions;

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service connection settings.
    pub server: ServerConfig,
    /// Wake request settings.
    pub wake: WakeConfig,
    /// Ping polling settings.
    pub poll: PollConfig,
    /// Status area settings.
    pub display: DisplayConfig,
}

impl ClientConfig {
    /// Defaults with a different service URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load configuration from the default path.
    ///
    /// Falls back to defaults when the file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem.
    ///
    /// # Example
    ///
    /// ```
    /// use wolweb_core::ClientConfig;
    ///
    /// let config = ClientConfig::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.wake.validate());
        errors.extend(self.poll.validate());
        errors.extend(self.display.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Poll timing.
    pub fn poll_options(&self) -> PollOptions {
        PollOptions::new()
            .interval(Duration::from_millis(self.poll.interval_ms))
            .budget(Duration::from_millis(self.poll.budget_ms))
    }

    /// Display dwell time.
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.display.dwell_ms)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Options for a [`DeviceBoard`](crate::DeviceBoard).
    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            poll: self.poll_options(),
            dwell: self.dwell(),
            broadcast_addr: self.wake.broadcast_addr.clone(),
        }
    }

    /// Build the HTTP transport for the configured service.
    pub fn transport(&self) -> crate::Result<HttpTransport> {
        HttpTransport::with_timeout(&self.server.base_url, self.request_timeout())
    }
}

/// Service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the wolweb service.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Maximum request timeout in seconds.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8951".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Validate server settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = normalize_base_url(&self.base_url) {
            errors.push(ValidationError {
                field: "server.base_url".to_string(),
                message: e.to_string(),
            });
        }

        if self.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "server.request_timeout_secs".to_string(),
                message: "request timeout cannot be 0".to_string(),
            });
        } else if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            errors.push(ValidationError {
                field: "server.request_timeout_secs".to_string(),
                message: format!(
                    "request timeout {} is too long (maximum {} seconds)",
                    self.request_timeout_secs, MAX_REQUEST_TIMEOUT_SECS
                ),
            });
        }

        errors
    }
}

/// Wake request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Broadcast address sent with every wake request. The service uses
    /// its own default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_addr: Option<String>,
}

impl WakeConfig {
    /// Validate wake settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(addr) = &self.broadcast_addr
            && addr.parse::<Ipv4Addr>().is_err()
        {
            errors.push(ValidationError {
                field: "wake.broadcast_addr".to_string(),
                message: format!("'{}' is not an IPv4 address", addr),
            });
        }

        errors
    }
}

/// Ping polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between probes in milliseconds.
    pub interval_ms: u64,
    /// Overall budget in milliseconds.
    pub budget_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        let options = PollOptions::default();
        Self {
            interval_ms: options.interval.as_millis() as u64,
            budget_ms: options.budget.as_millis() as u64,
        }
    }
}

impl PollConfig {
    /// Validate poll settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_ms == 0 {
            errors.push(ValidationError {
                field: "poll.interval_ms".to_string(),
                message: "poll interval cannot be 0".to_string(),
            });
        }
        if self.budget_ms == 0 {
            errors.push(ValidationError {
                field: "poll.budget_ms".to_string(),
                message: "poll budget cannot be 0".to_string(),
            });
        }

        errors
    }
}

/// Status area settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Minimum time a status stays on screen, in milliseconds.
    pub dwell_ms: u64,
}

/// Maximum dwell in milliseconds.
pub const MAX_DWELL_MS: u64 = 10_000;

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            dwell_ms: crate::debounce::DEFAULT_DWELL.as_millis() as u64,
        }
    }
}

impl DisplayConfig {
    /// Validate display settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.dwell_ms > MAX_DWELL_MS {
            errors.push(ValidationError {
                field: "display.dwell_ms".to_string(),
                message: format!(
                    "dwell {} is too long (maximum {} ms)",
                    self.dwell_ms, MAX_DWELL_MS
                ),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `server.base_url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wolweb")
        .join("client.toml")
}
