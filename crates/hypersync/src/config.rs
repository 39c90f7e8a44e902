//! Service configuration.
//!
//! Durations are written as integer milliseconds so that configs stay
//! readable as JSON:
//!
//! ```json
//! { "interval": 60000, "min_workers": 4, "max_workers": 16 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hypersync_sync::SessionConfig;

/// Configuration rejected by [`SyncConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid sync config: {0}")]
pub struct ConfigError(pub String);

/// Settings for discovery and syncing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound of the random delay before the scheduler first wakes.
    #[serde(with = "duration_ms")]
    pub warmup_duration: Duration,

    /// How often subscriptions are refreshed.
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// Time budget for syncing with a single peer, and for one discovery task.
    #[serde(with = "duration_ms")]
    pub timeout_per_peer: Duration,

    /// Persistent scheduler workers.
    pub min_workers: usize,

    /// Total scheduler workers, including bursts for hot tasks.
    pub max_workers: usize,

    /// Refuse to look for content on the network.
    pub no_discovery: bool,

    /// How long a blob download may go without receiving anything.
    #[serde(with = "duration_ms")]
    pub fetch_idle_timeout: Duration,

    /// Reconciliation session tuning.
    pub session: SessionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            warmup_duration: Duration::from_secs(20),
            interval: Duration::from_secs(60),
            timeout_per_peer: Duration::from_secs(5 * 60),
            min_workers: 4,
            max_workers: 16,
            no_discovery: false,
            fetch_idle_timeout: Duration::from_secs(40),
            session: SessionConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError(format!("malformed JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 || self.max_workers == 0 {
            return Err(ConfigError("worker counts must be non-zero".into()));
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError(format!(
                "max_workers ({}) must be at least min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if self.interval.is_zero() {
            return Err(ConfigError("interval must be non-zero".into()));
        }
        if self.timeout_per_peer.is_zero() {
            return Err(ConfigError("timeout_per_peer must be non-zero".into()));
        }
        self.session
            .validate()
            .map_err(|e| ConfigError(e.to_string()))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.session.frame_size_limit, 50_000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            SyncConfig::from_json(r#"{ "interval": 1500, "min_workers": 1, "max_workers": 2 }"#)
                .unwrap();
        assert_eq!(config.interval, Duration::from_millis(1500));
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.fetch_idle_timeout, Duration::from_secs(40));
        assert!(!config.no_discovery);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SyncConfig {
            no_discovery: true,
            warmup_duration: Duration::from_millis(5),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"warmup_duration\":5"));
        assert_eq!(SyncConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_workers() {
        let zero = SyncConfig {
            min_workers: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = SyncConfig {
            min_workers: 8,
            max_workers: 2,
            ..Default::default()
        };
        let err = inverted.validate().unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_rejects_zero_durations_and_bad_session() {
        assert!(SyncConfig::from_json(r#"{ "interval": 0 }"#).is_err());
        assert!(SyncConfig::from_json(r#"{ "timeout_per_peer": 0 }"#).is_err());
        assert!(
            SyncConfig::from_json(r#"{ "session": { "id_list_threshold": 1 } }"#).is_err()
        );
        assert!(SyncConfig::from_json("not json").is_err());
    }
}
