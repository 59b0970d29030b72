//! Controller configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// How many times a read-modify-write is retried after a version conflict.
    pub conflict_max_retries: usize,

    /// First backoff after a conflict; doubles per attempt.
    pub conflict_initial_backoff_ms: u64,

    /// Ceiling for the conflict backoff.
    pub conflict_max_backoff_ms: u64,

    /// Pools reconciled concurrently by one controller pass.
    pub max_parallel_pools: usize,

    /// Mirror sync tasks in flight per pool cycle.
    pub max_parallel_mirrors: usize,

    /// Period of the level-triggered resync loop.
    pub resync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            conflict_max_retries: 5,
            conflict_initial_backoff_ms: 10,
            conflict_max_backoff_ms: 1_000,
            max_parallel_pools: 4,
            max_parallel_mirrors: 8,
            resync_interval_secs: 30,
        }
    }
}

impl ControllerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `RESPOOL_CONFLICT_MAX_RETRIES`
    /// - `RESPOOL_CONFLICT_INITIAL_BACKOFF_MS`
    /// - `RESPOOL_CONFLICT_MAX_BACKOFF_MS`
    /// - `RESPOOL_MAX_PARALLEL_POOLS`
    /// - `RESPOOL_MAX_PARALLEL_MIRRORS`
    /// - `RESPOOL_RESYNC_INTERVAL_SECS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        let overrides = ConfigOverrides {
            conflict_max_retries: env_parse("RESPOOL_CONFLICT_MAX_RETRIES"),
            conflict_initial_backoff_ms: env_parse("RESPOOL_CONFLICT_INITIAL_BACKOFF_MS"),
            conflict_max_backoff_ms: env_parse("RESPOOL_CONFLICT_MAX_BACKOFF_MS"),
            max_parallel_pools: env_parse("RESPOOL_MAX_PARALLEL_POOLS"),
            max_parallel_mirrors: env_parse("RESPOOL_MAX_PARALLEL_MIRRORS"),
            resync_interval_secs: env_parse("RESPOOL_RESYNC_INTERVAL_SECS"),
        };
        overrides.apply(&mut cfg);
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_pools == 0 {
            return Err(Error::Config("max_parallel_pools must be > 0".into()));
        }
        if self.max_parallel_mirrors == 0 {
            return Err(Error::Config("max_parallel_mirrors must be > 0".into()));
        }
        if self.conflict_initial_backoff_ms > self.conflict_max_backoff_ms {
            return Err(Error::Config(format!(
                "conflict_initial_backoff_ms ({}) exceeds conflict_max_backoff_ms ({})",
                self.conflict_initial_backoff_ms, self.conflict_max_backoff_ms
            )));
        }
        if self.resync_interval_secs == 0 {
            return Err(Error::Config("resync_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Partial config as found in a world file or on the command line. Only the
/// fields that are set win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub conflict_max_retries: Option<usize>,
    pub conflict_initial_backoff_ms: Option<u64>,
    pub conflict_max_backoff_ms: Option<u64>,
    pub max_parallel_pools: Option<usize>,
    pub max_parallel_mirrors: Option<usize>,
    pub resync_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, cfg: &mut ControllerConfig) {
        if let Some(v) = self.conflict_max_retries {
            cfg.conflict_max_retries = v;
        }
        if let Some(v) = self.conflict_initial_backoff_ms {
            cfg.conflict_initial_backoff_ms = v;
        }
        if let Some(v) = self.conflict_max_backoff_ms {
            cfg.conflict_max_backoff_ms = v;
        }
        if let Some(v) = self.max_parallel_pools {
            cfg.max_parallel_pools = v;
        }
        if let Some(v) = self.max_parallel_mirrors {
            cfg.max_parallel_mirrors = v;
        }
        if let Some(v) = self.resync_interval_secs {
            cfg.resync_interval_secs = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
