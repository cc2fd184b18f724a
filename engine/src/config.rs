//! Engine configuration.
//!
//! Priority chain: built-in defaults, then an optional TOML file, then
//! `XFER_*` environment variables. Front ends apply their own flags last.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The copy strategies the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Robocopy,
    Xcopy,
    Rsync,
    Cp,
    Portable,
}

impl StrategyKind {
    /// Default chain for the platform this binary was built for.
    pub fn platform_chain() -> Vec<StrategyKind> {
        if cfg!(windows) {
            vec![StrategyKind::Robocopy, StrategyKind::Xcopy, StrategyKind::Portable]
        } else {
            vec![StrategyKind::Rsync, StrategyKind::Cp, StrategyKind::Portable]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size for individual-file jobs
    pub worker_count: usize,

    /// How many sequence batches may run at once
    pub batch_lanes: usize,

    /// Thread count handed to the bulk-copy utility (robocopy /MT)
    pub bulk_threads: u32,

    /// Destination polling interval for opaque strategies
    pub poll_interval_ms: u64,

    /// Seconds without visible progress before heartbeats are flagged as stalled
    pub stall_heartbeat_secs: u64,

    /// Hard limit for one native-utility invocation; `None` disables it
    pub process_timeout_secs: Option<u64>,

    /// Read/write buffer size of the portable strategy
    pub chunk_size: usize,

    /// Sum member sizes up front so batch progress can report speed and ETA
    pub precompute_batch_sizes: bool,

    /// Terminate running utilities when the session is cancelled
    pub kill_on_cancel: bool,

    /// Ordered strategy chain. The portable strategy is always appended.
    pub strategies: Vec<StrategyKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            worker_count: 8,
            batch_lanes: 1,
            bulk_threads: 32,
            poll_interval_ms: 500,
            stall_heartbeat_secs: 5,
            process_timeout_secs: Some(4 * 60 * 60),
            chunk_size: 1024 * 1024,
            precompute_batch_sizes: true,
            kill_on_cancel: true,
            strategies: StrategyKind::platform_chain(),
        }
    }
}

impl EngineConfig {
    /// Load a TOML config file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `XFER_WORKERS`, `XFER_BULK_THREADS` and `XFER_PROCESS_TIMEOUT_SECS`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = get("XFER_WORKERS") {
            self.worker_count = parse_var("XFER_WORKERS", &value)?;
        }
        if let Some(value) = get("XFER_BULK_THREADS") {
            self.bulk_threads = parse_var("XFER_BULK_THREADS", &value)?;
        }
        if let Some(value) = get("XFER_PROCESS_TIMEOUT_SECS") {
            let secs: u64 = parse_var("XFER_PROCESS_TIMEOUT_SECS", &value)?;
            self.process_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("worker_count", self.worker_count as u64),
            ("batch_lanes", self.batch_lanes as u64),
            ("bulk_threads", self.bulk_threads as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("chunk_size", self.chunk_size as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_heartbeat_secs)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }

    /// The configured chain with the portable strategy guaranteed last.
    pub fn strategy_chain(&self) -> Vec<StrategyKind> {
        let mut chain: Vec<StrategyKind> = self
            .strategies
            .iter()
            .copied()
            .filter(|k| *k != StrategyKind::Portable)
            .collect();
        chain.dedup();
        chain.push(StrategyKind::Portable);
        chain
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}
