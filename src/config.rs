//! Configuration file parser for ~/.config/feedwatch/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::RotatedFeedPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level watcher configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on one feed check, in seconds.
    pub check_timeout_secs: u64,

    /// Retries for rate limiting (429), server errors and truncated bodies.
    pub max_retries: u32,

    /// How many feeds `check_all` fetches at once.
    pub max_concurrent_checks: usize,

    /// Poll interval for `watch`. 0 = manual checks only.
    pub refresh_interval_minutes: u64,

    /// What to report when the last seen item rotated out of the feed.
    pub rotated_feed_policy: RotatedFeedPolicy,

    /// Allow feed URLs on localhost and private networks.
    pub allow_private_addresses: bool,

    /// User-Agent header sent with every feed request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_timeout_secs: 30,
            max_retries: 2,
            max_concurrent_checks: 8,
            refresh_interval_minutes: 0,
            rotated_feed_policy: RotatedFeedPolicy::default(),
            allow_private_addresses: false,
            user_agent: format!("feedwatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "check_timeout_secs",
        "max_retries",
        "max_concurrent_checks",
        "refresh_interval_minutes",
        "rotated_feed_policy",
        "allow_private_addresses",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero timeout or concurrency → raised to 1, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Size check before reading guards against a huge or corrupted file
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        let config = config.sanitized();
        tracing::info!(
            path = %path.display(),
            timeout_secs = config.check_timeout_secs,
            policy = ?config.rotated_feed_policy,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn sanitized(mut self) -> Self {
        if self.check_timeout_secs == 0 {
            tracing::warn!("check_timeout_secs = 0 is not allowed, using 1");
            self.check_timeout_secs = 1;
        }
        if self.max_concurrent_checks == 0 {
            tracing::warn!("max_concurrent_checks = 0 is not allowed, using 1");
            self.max_concurrent_checks = 1;
        }
        self
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// `None` when periodic checking is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.refresh_interval_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
