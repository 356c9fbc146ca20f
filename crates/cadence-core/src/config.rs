//! Settings - 実行時設定
//!
//! Every section has defaults, so an empty TOML document is a valid config.
//!
//! ```toml
//! [scheduling]
//! min_lead_time_secs = 900
//!
//! [workers]
//! concurrency = 5
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 2000
//! multiplier = 2.0
//!
//! [simulation]
//! duration_ms = 10000
//! failure_rate = 0.5
//!
//! [publisher]
//! capacity = 256
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduling: SchedulingSettings,
    pub workers: WorkerSettings,
    pub retry: RetrySettings,
    pub simulation: SimulationSettings,
    pub publisher: PublisherSettings,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingSettings {
    /// One-time tasks must be scheduled at least this far ahead.
    pub min_lead_time_secs: u64,
}

impl SchedulingSettings {
    pub fn min_lead_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_lead_time_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            min_lead_time_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Upper bound on executions running in parallel.
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total runs allowed for a one-shot execution (1 = no retry).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            multiplier: s.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub duration_ms: u64,

    /// Probability in [0, 1] that a simulated run fails.
    pub failure_rate: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            failure_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Buffered snapshots per subscriber before lagging ones drop updates.
    pub capacity: usize,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
