use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::metrics::StoreMetrics;
use crate::storage::tx::IsolationLevel;
use crate::types::{BitsyError, Result};

/// Default Tx log size that triggers a copy into the V/E files.
pub const DEFAULT_TX_LOG_THRESHOLD: u64 = 4 * 1024 * 1024;
/// Default ratio of new lines to original lines that triggers a reorg.
pub const DEFAULT_REORG_FACTOR: f64 = 1.0;
/// Default lower bound on new lines before a reorg.
pub const DEFAULT_MIN_LINES_PER_REORG: u64 = 1000;

/// Configuration options supplied when opening a [`super::GraphStore`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Bytes appended to a Tx log before it is copied into the V/E files.
    pub tx_log_threshold: u64,
    /// Reorg once new lines exceed this multiple of the lines present after
    /// the previous reorg.
    pub reorg_factor: f64,
    /// Minimum number of new lines before a reorg.
    pub min_lines_per_reorg: u64,
    /// Isolation level of transactions opened with `new_transaction`.
    pub isolation: IsolationLevel,
    /// Whether lookups on unindexed keys fall back to scanning every element.
    pub allow_full_graph_scans: bool,
    /// Optimistic read attempts before a reader blocks on the shared lock.
    pub read_spin_limit: u32,
    /// How long shutdown waits for each pipeline worker.
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Optional metrics sink.
    #[serde(skip)]
    pub metrics: Option<Arc<dyn StoreMetrics>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            tx_log_threshold: DEFAULT_TX_LOG_THRESHOLD,
            reorg_factor: DEFAULT_REORG_FACTOR,
            min_lines_per_reorg: DEFAULT_MIN_LINES_PER_REORG,
            isolation: IsolationLevel::ReadCommitted,
            allow_full_graph_scans: true,
            read_spin_limit: 64,
            shutdown_timeout: Duration::from_secs(10),
            metrics: None,
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("tx_log_threshold", &self.tx_log_threshold)
            .field("reorg_factor", &self.reorg_factor)
            .field("min_lines_per_reorg", &self.min_lines_per_reorg)
            .field("isolation", &self.isolation)
            .field("allow_full_graph_scans", &self.allow_full_graph_scans)
            .field("read_spin_limit", &self.read_spin_limit)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: StoreOptions = toml::from_str(text)
            .map_err(|err| BitsyError::InvalidOwned(format!("invalid store options: {err}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Reads and parses a TOML options file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.tx_log_threshold == 0 {
            return Err(BitsyError::Invalid("tx_log_threshold must be positive"));
        }
        if !self.reorg_factor.is_finite() || self.reorg_factor < 0.0 {
            return Err(BitsyError::Invalid(
                "reorg_factor must be a non-negative number",
            ));
        }
        Ok(())
    }

    /// Sets the Tx log copy threshold in bytes.
    pub fn tx_log_threshold(mut self, bytes: u64) -> Self {
        self.tx_log_threshold = bytes;
        self
    }

    /// Sets the reorg factor.
    pub fn reorg_factor(mut self, factor: f64) -> Self {
        self.reorg_factor = factor;
        self
    }

    /// Sets the minimum number of new lines per reorg.
    pub fn min_lines_per_reorg(mut self, lines: u64) -> Self {
        self.min_lines_per_reorg = lines;
        self
    }

    /// Sets the default isolation level.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Allows or forbids lookups on unindexed keys.
    pub fn allow_full_graph_scans(mut self, allow: bool) -> Self {
        self.allow_full_graph_scans = allow;
        self
    }

    /// Sets the optimistic read retry budget.
    pub fn read_spin_limit(mut self, attempts: u32) -> Self {
        self.read_spin_limit = attempts;
        self
    }

    /// Sets the bounded join timeout used at shutdown.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
