//! # Mirror Configuration
//!
//! Settings for the playlist mirror: where snapshots live, how hard the sync
//! engine may lean on the remote source, and which playlists are mirrored.
//!
//! ## Overview
//!
//! [`MirrorConfig`] is built with [`MirrorConfigBuilder`], which validates every
//! value before handing out a config. Validation fails fast with an
//! [`Error::Config`] describing the offending field.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::MirrorConfig;
//!
//! let config = MirrorConfig::builder()
//!     .backup_dir("/tmp/SpotifyBackup")
//!     .max_concurrent_fetches(2)
//!     .include_collaborative(false)
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.max_concurrent_fetches, 2);
//! ```
//!
//! A config can also be read from a JSON document; missing fields take their
//! defaults and the result is validated the same way:
//!
//! ```ignore
//! let config = MirrorConfig::from_json_file("mirror.json")?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default snapshot directory, relative to the working directory.
pub const DEFAULT_BACKUP_DIR: &str = "SpotifyBackup";

const MAX_CONCURRENT_FETCHES: usize = 16;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Bounded retry parameters for remote requests.
///
/// Durations are stored in milliseconds so the JSON form stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
    /// First backoff after a transient failure; doubles on each retry.
    pub base_wait_ms: u64,
    /// Upper bound for a single backoff.
    pub max_wait_ms: u64,
    /// Random extra wait in `0..=jitter_ms` added to every backoff.
    pub jitter_ms: u64,
    /// Added on top of the remote's suggested retry-after.
    pub throttle_margin_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_wait_ms: 500,
            max_wait_ms: 60_000,
            jitter_ms: 250,
            throttle_margin_ms: 1_000,
        }
    }
}

impl RetrySettings {
    pub fn base_wait(&self) -> Duration {
        Duration::from_millis(self.base_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn throttle_margin(&self) -> Duration {
        Duration::from_millis(self.throttle_margin_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_attempts > 20 {
            return Err(Error::Config(
                "retry.max_attempts exceeds maximum of 20".to_string(),
            ));
        }
        if self.base_wait_ms > self.max_wait_ms {
            return Err(Error::Config(format!(
                "retry.base_wait_ms ({}) cannot exceed retry.max_wait_ms ({})",
                self.base_wait_ms, self.max_wait_ms
            )));
        }
        Ok(())
    }
}

/// Which playlists from the remote listing are mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistFilters {
    /// Mirror playlists curated by the service itself.
    pub include_service_playlists: bool,
    /// Mirror collaborative playlists.
    pub include_collaborative: bool,
}

impl Default for PlaylistFilters {
    fn default() -> Self {
        Self {
            include_service_playlists: true,
            include_collaborative: true,
        }
    }
}

/// Playlist mirror configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Root directory of the snapshot store.
    pub backup_dir: PathBuf,
    /// Playlists fetched concurrently.
    pub max_concurrent_fetches: usize,
    /// Deadline for a single remote request.
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
    pub filters: PlaylistFilters,
    /// Archived index copies kept under `history/`.
    pub history_retention: usize,
    /// Entries kept in the sync log.
    pub sync_log_retention: usize,
    /// Event bus buffer per subscriber.
    pub event_buffer_size: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            max_concurrent_fetches: 4,
            request_timeout_secs: 30,
            retry: RetrySettings::default(),
            filters: PlaylistFilters::default(),
            history_retention: 10,
            sync_log_retention: 100,
            event_buffer_size: crate::events::DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl MirrorConfig {
    /// Creates a new builder seeded with defaults.
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reads and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: MirrorConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.backup_dir.as_os_str().is_empty() {
            return Err(Error::Config("Backup directory cannot be empty".to_string()));
        }

        if self.max_concurrent_fetches == 0 {
            return Err(Error::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_fetches > MAX_CONCURRENT_FETCHES {
            return Err(Error::Config(format!(
                "max_concurrent_fetches exceeds maximum of {}; the remote source \
                 throttles aggressive clients",
                MAX_CONCURRENT_FETCHES
            )));
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "request_timeout_secs must be between 1 and {}",
                MAX_REQUEST_TIMEOUT_SECS
            )));
        }

        self.retry.validate()?;

        if self.history_retention == 0 {
            return Err(Error::Config(
                "history_retention must keep at least one archive".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`MirrorConfig`] instances.
#[derive(Debug, Default)]
pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl MirrorConfigBuilder {
    /// Sets the snapshot store root.
    pub fn backup_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.backup_dir = path.into();
        self
    }

    /// Caps concurrent playlist fetches. Default: 4.
    pub fn max_concurrent_fetches(mut self, count: usize) -> Self {
        self.config.max_concurrent_fetches = count;
        self
    }

    /// Per-request deadline. Default: 30 seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn include_service_playlists(mut self, include: bool) -> Self {
        self.config.filters.include_service_playlists = include;
        self
    }

    pub fn include_collaborative(mut self, include: bool) -> Self {
        self.config.filters.include_collaborative = include;
        self
    }

    pub fn history_retention(mut self, keep: usize) -> Self {
        self.config.history_retention = keep;
        self
    }

    pub fn sync_log_retention(mut self, keep: usize) -> Self {
        self.config.sync_log_retention = keep;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// Validates and returns the config.
    pub fn build(self) -> Result<MirrorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MirrorConfig::builder().build().unwrap();

        assert_eq!(config.backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.history_retention, 10);
        assert_eq!(config.sync_log_retention, 100);
        assert!(config.filters.include_service_playlists);
        assert!(config.filters.include_collaborative);
    }

    #[test]
    fn test_builder_overrides() {
        let config = MirrorConfig::builder()
            .backup_dir("/data/mirror")
            .max_concurrent_fetches(8)
            .request_timeout_secs(10)
            .include_service_playlists(false)
            .include_collaborative(false)
            .history_retention(3)
            .sync_log_retention(20)
            .build()
            .unwrap();

        assert_eq!(config.backup_dir, PathBuf::from("/data/mirror"));
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.request_timeout_secs, 10);
        assert!(!config.filters.include_service_playlists);
        assert!(!config.filters.include_collaborative);
        assert_eq!(config.history_retention, 3);
        assert_eq!(config.sync_log_retention, 20);
    }

    #[test]
    fn test_rejects_empty_backup_dir() {
        let err = MirrorConfig::builder().backup_dir("").build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Backup directory")));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = MirrorConfig::builder()
            .max_concurrent_fetches(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("max_concurrent_fetches")));
    }

    #[test]
    fn test_rejects_unbounded_fan_out() {
        let result = MirrorConfig::builder().max_concurrent_fetches(64).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = MirrorConfig::builder().request_timeout_secs(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_inverted_retry_waits() {
        let retry = RetrySettings {
            base_wait_ms: 10_000,
            max_wait_ms: 1_000,
            ..RetrySettings::default()
        };
        let err = MirrorConfig::builder().retry(retry).build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("base_wait_ms")));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let retry = RetrySettings {
            max_attempts: 0,
            ..RetrySettings::default()
        };
        assert!(MirrorConfig::builder().retry(retry).build().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = MirrorConfig::from_json_str(
            r#"{ "backup_dir": "/srv/backup", "retry": { "max_attempts": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.backup_dir, PathBuf::from("/srv/backup"));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_wait_ms, 500);
        assert_eq!(config.max_concurrent_fetches, 4);
    }

    #[test]
    fn test_from_json_validates() {
        let err = MirrorConfig::from_json_str(r#"{ "max_concurrent_fetches": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = MirrorConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Invalid config document")));
    }

    #[test]
    fn test_from_missing_file() {
        let err = MirrorConfig::from_json_file("/nonexistent/mirror.json").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Failed to read config")));
    }

    #[test]
    fn test_retry_durations() {
        let retry = RetrySettings::default();
        assert_eq!(retry.base_wait(), Duration::from_millis(500));
        assert_eq!(retry.max_wait(), Duration::from_secs(60));
        assert_eq!(retry.jitter(), Duration::from_millis(250));
        assert_eq!(retry.throttle_margin(), Duration::from_secs(1));
    }
}
