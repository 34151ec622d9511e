use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("approval lock timeout must be non-zero")]
    ZeroApprovalTimeout,

    #[error("event channel capacity must be non-zero")]
    ZeroChannelCapacity,

    #[error("sweep interval must be non-zero when set")]
    ZeroSweepInterval,

    #[error("compaction threshold must be non-zero")]
    ZeroCompactThreshold,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory holding the reservation WAL.
    pub data_dir: PathBuf,

    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,

    /// Upper bound on how long `approve()` waits for the property lock.
    ///
    /// Past it the approval fails with `BookingConflict` instead of queueing
    /// behind other writers.
    pub approval_lock_timeout: Duration,

    /// Period of the stale-request sweeper. `None` disables it.
    pub sweep_interval: Option<Duration>,

    /// Buffer of each per-property event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            approval_lock_timeout: Duration::from_millis(500),
            sweep_interval: None,
            event_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("STAYLINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Self {
            data_dir,
            compact_threshold: env_parse("STAYLINE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            approval_lock_timeout: env_parse("STAYLINE_APPROVAL_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.approval_lock_timeout),
            sweep_interval: env_parse("STAYLINE_SWEEP_INTERVAL_SECS").map(Duration::from_secs),
            event_channel_capacity: env_parse("STAYLINE_EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    /// Config rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compact_threshold == 0 {
            return Err(ConfigError::ZeroCompactThreshold);
        }
        if self.approval_lock_timeout.is_zero() {
            return Err(ConfigError::ZeroApprovalTimeout);
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.sweep_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Parse an env var, warning (not failing) on garbage.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.sweep_interval.is_none());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/reservations.wal"));
    }

    #[test]
    fn zero_values_rejected() {
        let cfg = EngineConfig {
            approval_lock_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroApprovalTimeout));

        let cfg = EngineConfig {
            event_channel_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroChannelCapacity));

        let cfg = EngineConfig {
            sweep_interval: Some(Duration::ZERO),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSweepInterval));

        let cfg = EngineConfig {
            compact_threshold: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCompactThreshold));
    }

    #[test]
    fn env_parse_ignores_garbage() {
        // Key unique to this test; env is process-global.
        unsafe { std::env::set_var("STAYLINE_TEST_GARBAGE", "not-a-number") };
        assert_eq!(env_parse::<u64>("STAYLINE_TEST_GARBAGE"), None);
        unsafe { std::env::set_var("STAYLINE_TEST_GARBAGE", "42") };
        assert_eq!(env_parse::<u64>("STAYLINE_TEST_GARBAGE"), Some(42));
        unsafe { std::env::remove_var("STAYLINE_TEST_GARBAGE") };
    }
}
