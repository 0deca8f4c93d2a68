//! Memory pool configuration that downstream crates can serialize/deserialize.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::parse_size;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Identity used to label logs and stats.
    pub name: String,

    /// Interval between reclamation ticks. Zero picks the built-in default at init.
    pub period_ms: u64,

    /// Free-memory headroom (bytes) reclamation tries to preserve. Zero sizes it
    /// from the probed total memory at init.
    pub min_free_bytes: u64,

    /// Extra invariant checks (foreign-buffer release, use after shutdown).
    pub debug: bool,

    /// Under memory pressure each class releases at most `idle / reclaim_fraction_denom`
    /// buffers per tick (never less than one).
    pub reclaim_fraction_denom: usize,

    /// Without pressure, buffers idle for this many periods are released.
    pub stale_after_periods: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "memsys".to_string(),
            period_ms: 2 * 60 * 1000,
            min_free_bytes: 0,
            debug: false,
            reclaim_fraction_denom: 4,
            stale_after_periods: 2,
        }
    }
}

impl PoolConfig {
    /// The four options every pool is identified by; reclamation knobs keep
    /// their defaults.
    pub fn new(name: impl Into<String>, period: Duration, min_free_bytes: u64, debug: bool) -> Self {
        Self {
            name: name.into(),
            period_ms: period.as_millis() as u64,
            min_free_bytes,
            debug,
            ..Self::default()
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MEMSYS_NAME`: pool name
    /// - `MEMSYS_PERIOD_MS`: reclamation period in milliseconds
    /// - `MEMSYS_MIN_FREE`: free-memory headroom, e.g. `1GiB` or plain bytes
    /// - `MEMSYS_DEBUG`: `1`/`true` enables debug checks
    /// - `MEMSYS_RECLAIM_FRACTION`: per-tick release denominator
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MEMSYS_NAME") {
            if !s.trim().is_empty() {
                cfg.name = s;
            }
        }

        if let Ok(s) = std::env::var("MEMSYS_PERIOD_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.period_ms = v;
            }
        }

        if let Ok(s) = std::env::var("MEMSYS_MIN_FREE") {
            if let Ok(v) = parse_size(&s) {
                cfg.min_free_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("MEMSYS_DEBUG") {
            cfg.debug = matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        if let Ok(s) = std::env::var("MEMSYS_RECLAIM_FRACTION") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.reclaim_fraction_denom = v;
            }
        }

        cfg
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("pool name must not be empty".into()));
        }
        if self.reclaim_fraction_denom == 0 {
            return Err(Error::Config("reclaim_fraction_denom must be at least 1".into()));
        }
        Ok(())
    }
}
