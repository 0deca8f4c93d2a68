//! Environment memory probing.
//!
//! The pool asks a [`MemProbe`] for total and available memory at init (to size
//! defaults) and on every reclamation tick (to detect pressure).

use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
}

pub trait MemProbe: Send + Sync {
    fn probe(&self) -> Result<MemInfo>;
}

/// Reads Linux `/proc/meminfo`.
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemProbe for ProcMeminfo {
    fn probe(&self) -> Result<MemInfo> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| Error::Probe(format!("{}: {e}", self.path.display())))?;
        parse_meminfo(&text)
    }
}

/// Parse the `MemTotal` and `MemAvailable` lines (kB units). Kernels without
/// `MemAvailable` fall back to `MemFree`.
pub fn parse_meminfo(text: &str) -> Result<MemInfo> {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kb) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key {
            "MemTotal:" => total = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            "MemFree:" => free = Some(bytes),
            _ => {}
        }
    }

    let total = total.ok_or_else(|| Error::Probe("meminfo: missing MemTotal".into()))?;
    let available = available
        .or(free)
        .ok_or_else(|| Error::Probe("meminfo: missing MemAvailable and MemFree".into()))?;
    Ok(MemInfo { total, available })
}

/// Probe with externally controlled answers. Useful for embedding the pool in
/// environments without `/proc`, and for driving reclamation deterministically.
#[derive(Debug)]
pub struct StaticProbe {
    answer: Mutex<std::result::Result<MemInfo, String>>,
}

impl StaticProbe {
    pub fn new(info: MemInfo) -> Self {
        Self {
            answer: Mutex::new(Ok(info)),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            answer: Mutex::new(Err(reason.into())),
        }
    }

    pub fn set(&self, info: MemInfo) {
        *self.answer.lock() = Ok(info);
    }

    pub fn set_available(&self, available: u64) {
        let mut answer = self.answer.lock();
        let total = answer.as_ref().map(|m| m.total).unwrap_or(available);
        *answer = Ok(MemInfo {
            total: total.max(available),
            available,
        });
    }

    pub fn fail(&self, reason: impl Into<String>) {
        *self.answer.lock() = Err(reason.into());
    }
}

impl MemProbe for StaticProbe {
    fn probe(&self) -> Result<MemInfo> {
        self.answer.lock().clone().map_err(Error::Probe)
    }
}

impl<P: MemProbe + ?Sized> MemProbe for std::sync::Arc<P> {
    fn probe(&self) -> Result<MemInfo> {
        (**self).probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:       16318480 kB\n\
                          MemFree:         1021832 kB\n\
                          MemAvailable:    9822044 kB\n\
                          Buffers:          412340 kB\n";

    #[test]
    fn parses_meminfo() {
        let info = parse_meminfo(SAMPLE).unwrap();
        assert_eq!(info.total, 16318480 * 1024);
        assert_eq!(info.available, 9822044 * 1024);
    }

    #[test]
    fn falls_back_to_memfree() {
        let info = parse_meminfo("MemTotal: 100 kB\nMemFree: 40 kB\n").unwrap();
        assert_eq!(info.available, 40 * 1024);
    }

    #[test]
    fn missing_total_is_an_error() {
        assert!(matches!(parse_meminfo("MemFree: 1 kB\n"), Err(Error::Probe(_))));
    }

    #[test]
    fn missing_file_is_a_probe_error() {
        let probe = ProcMeminfo::with_path("/nonexistent/memsys/meminfo");
        assert!(matches!(probe.probe(), Err(Error::Probe(_))));
    }

    #[test]
    fn static_probe_can_be_updated() {
        let probe = StaticProbe::failing("no proc");
        assert!(probe.probe().is_err());
        probe.set_available(10);
        assert_eq!(probe.probe().unwrap(), MemInfo { total: 10, available: 10 });
        probe.set(MemInfo { total: 100, available: 50 });
        probe.set_available(20);
        assert_eq!(probe.probe().unwrap(), MemInfo { total: 100, available: 20 });
    }
}
