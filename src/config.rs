//! Configuration management for voicestream.
//!
//! Handles loading, saving, and providing defaults for the client
//! configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xdg::BaseDirectories;

const APP_NAME: &str = "voicestream";

/// Main configuration struct for the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub stream: StreamConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Audio pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate fed to the transcription service.
    pub target_sample_rate: u32,
    /// Samples per emitted frame (800 = 50ms at 16kHz).
    pub frame_size: usize,
    /// Input samples between signal-level reports.
    pub level_interval: usize,
    /// Preferred capture rate to request from the device.
    pub preferred_capture_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            frame_size: 800,
            level_interval: 4_000,
            preferred_capture_rate: 44_100,
        }
    }
}

/// Streaming backend endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint of the transcription service.
    pub endpoint: String,
    /// HTTPS endpoint issuing short-lived streaming tokens.
    pub token_url: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://localhost:8443/v1/stream".to_string(),
            token_url: "https://localhost:8443/v1/token".to_string(),
        }
    }
}

/// Reconnection backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Attempts before the connection is declared failed.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1);
        let ms = self.base_delay_ms as f64 * self.multiplier.powi(exp as i32);
        std::time::Duration::from_millis(ms as u64)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive string for this crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "voicestream=error",
            LogLevel::Warn => "voicestream=warn",
            LogLevel::Info => "voicestream=info",
            LogLevel::Debug => "voicestream=debug",
            LogLevel::Trace => "voicestream=trace",
        }
    }
}

impl Config {
    /// Returns the default config directory path.
    /// `~/.config/voicestream/` (or `$XDG_CONFIG_HOME/voicestream/`)
    pub fn config_dir() -> Result<PathBuf> {
        BaseDirectories::with_prefix(APP_NAME)
            .get_config_home()
            .context("Could not determine config directory (HOME not set?)")
    }

    /// Returns the default config file path.
    /// `~/.config/voicestream/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file as TOML")
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
