//! Configuration management for iris-link
//!
//! Provides loading, saving and validation of the server address, shared
//! secret, capture settings and log filter. Files are TOML; environment
//! variables prefixed `IRIS_` (nested keys joined by `__`) override them.

use crate::capture::orchestrator::{
    clamp_interval, DEFAULT_AUTO_CAPTURE_INTERVAL, MAX_AUTO_CAPTURE_INTERVAL,
    MIN_AUTO_CAPTURE_INTERVAL,
};
use crate::capture::DEFAULT_JPEG_QUALITY;
use crate::errors::LinkError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `IRIS_SERVER__SHARED_SECRET`.
pub const ENV_PREFIX: &str = "IRIS";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrisConfig {
    pub server: ServerConfig,
    pub capture: CaptureSettings,
    pub logging: LoggingConfig,
}

/// Where to connect and how to authenticate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base address; scheme optional, signaling/upload suffixes tolerated
    pub base_url: String,
    /// Sent as `X-Ermete-PSK`; must be non-empty to connect
    pub shared_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Start periodic capture as soon as the stream starts
    pub auto_capture: bool,
    /// Periodic capture interval in milliseconds (5000-20000)
    pub interval_ms: u64,
    /// Re-encode quality for uploads (1-100)
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://10.0.2.2:8080".to_string(),
            shared_secret: String::new(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            auto_capture: false,
            interval_ms: DEFAULT_AUTO_CAPTURE_INTERVAL.as_millis() as u64,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "iris_link=info".to_string(),
        }
    }
}

impl CaptureSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The configured interval coerced into the supported window.
    pub fn clamped_interval(&self) -> Duration {
        clamp_interval(self.interval())
    }

    /// Interval for periodic capture at stream start, or `None` when it
    /// stays off. An explicit `requested` interval turns it on regardless
    /// of `auto_capture`.
    pub fn startup_auto_capture(&self, requested: Option<Duration>) -> Option<Duration> {
        match requested {
            Some(interval) => Some(clamp_interval(interval)),
            None if self.auto_capture => Some(self.clamped_interval()),
            None => None,
        }
    }
}

impl IrisConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, LinkError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| LinkError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: IrisConfig = toml::from_str(&contents)
            .map_err(|e| LinkError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `IRIS_*` environment
    /// variables, in that order of precedence (last wins).
    pub fn load_layered(path: Option<&Path>) -> Result<Self, LinkError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&IrisConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<IrisConfig>()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LinkError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| LinkError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| LinkError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("iris-link.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Some(&Self::default_path())).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.server.base_url.trim().is_empty() {
            return Err(LinkError::ConfigError("Server base URL is empty".to_string()));
        }

        let quality = self.capture.jpeg_quality;
        if quality == 0 || quality > 100 {
            return Err(LinkError::ConfigError(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        let interval = self.capture.interval();
        if interval < MIN_AUTO_CAPTURE_INTERVAL || interval > MAX_AUTO_CAPTURE_INTERVAL {
            return Err(LinkError::ConfigError(format!(
                "Auto-capture interval must be between {} and {} ms",
                MIN_AUTO_CAPTURE_INTERVAL.as_millis(),
                MAX_AUTO_CAPTURE_INTERVAL.as_millis()
            )));
        }

        Ok(())
    }
}
