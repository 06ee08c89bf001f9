use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedSyncError, Result};
use crate::scheduler::SchedulerConfig;
use crate::sync::retry::RetryPolicy;

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Data directory; the cache lives in `{data_dir}/cache`
    pub data_dir: PathBuf,
    /// Items per requested page
    pub page_size: u32,
    /// Parallel fetch workers per pass
    pub concurrency: usize,
    /// Trailing span re-fetched on resume (days)
    pub overlap_window_days: u32,
    /// Partitions not synced for longer than this are reclaimed (days)
    pub retention_days: u32,
    /// Per-fetch timeout (seconds)
    pub fetch_timeout_secs: u64,
    /// `needs_sync` turns true once the last pass is older than this (seconds)
    pub refresh_interval_secs: u64,
    /// Ask the count endpoint for a progress total before fetching
    pub estimate_total: bool,
    /// Sweep stale partitions after each successful pass
    pub reap_after_sync: bool,
    /// Capacity of the sync event channel
    pub event_capacity: usize,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            page_size: 200,
            concurrency: 5,
            overlap_window_days: 30,
            retention_days: 14,
            fetch_timeout_secs: 30,
            refresh_interval_secs: 6 * 60 * 60,
            estimate_total: true,
            reap_after_sync: true,
            event_capacity: 256,
            retry: RetryPolicy::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// `~/.feedsync/`, falling back to the working directory.
fn default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".feedsync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".feedsync")
    } else {
        PathBuf::from("./feedsync_data")
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| FeedSyncError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FeedSyncError::Config("page_size must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(FeedSyncError::Config("concurrency must be at least 1".to_string()));
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(FeedSyncError::Config(
                "scheduler.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(FeedSyncError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.scheduler.jitter_min_ms > self.scheduler.jitter_max_ms {
            return Err(FeedSyncError::Config(
                "scheduler jitter range is inverted".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(FeedSyncError::Config(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn overlap_window_ms(&self) -> i64 {
        self.overlap_window_days as i64 * DAY_MS
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_days as i64 * DAY_MS
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_interval_ms(&self) -> i64 {
        self.refresh_interval_secs as i64 * 1_000
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.concurrency = workers;
        self
    }

    pub fn overlap_window_days(mut self, days: u32) -> Self {
        self.config.overlap_window_days = days;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.retention_days = days;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn refresh_interval_secs(mut self, secs: u64) -> Self {
        self.config.refresh_interval_secs = secs;
        self
    }

    pub fn estimate_total(mut self, enabled: bool) -> Self {
        self.config.estimate_total = enabled;
        self
    }

    pub fn reap_after_sync(mut self, enabled: bool) -> Self {
        self.config.reap_after_sync = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.page_size, 200);
        assert_eq!(config.overlap_window_ms(), 30 * DAY_MS);
        assert_eq!(config.retention_ms(), 14 * DAY_MS);
        assert!(config.data_dir.ends_with(".feedsync") || config.data_dir.ends_with("feedsync_data"));
    }

    #[test]
    fn builder_rejects_zero_sizes() {
        assert!(SyncConfig::builder().page_size(0).build().is_err());
        assert!(SyncConfig::builder().concurrency(0).build().is_err());
        let config = SyncConfig::builder()
            .page_size(50)
            .concurrency(3)
            .overlap_window_days(7)
            .build()
            .unwrap();
        assert_eq!(config.overlap_window_ms(), 7 * DAY_MS);
    }

    #[test]
    fn json_file_fills_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feedsync.json");
        std::fs::write(
            &path,
            r#"{ "page_size": 100, "scheduler": { "max_in_flight": 2, "jitter_min_ms": 0, "jitter_max_ms": 0,
                 "count": { "cooldown_ms": 0, "serialized": false, "min_interval_ms": 0 },
                 "records": { "cooldown_ms": 0, "serialized": false, "min_interval_ms": 0 },
                 "search": { "cooldown_ms": 0, "serialized": true, "min_interval_ms": 0 } } }"#,
        )
        .unwrap();

        let config = SyncConfig::from_json_file(&path).unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.scheduler.max_in_flight, 2);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry, RetryPolicy::default());

        std::fs::write(&path, r#"{ "concurrency": 0 }"#).unwrap();
        assert!(SyncConfig::from_json_file(&path).is_err());
    }
}
