//! Memory pool: the size-class ladder, allocation routing, and lifecycle.
//!
//! A [`MemoryPool`] is an ordinary value: build as many as needed (one per
//! subsystem, one per test). `init` probes the environment and starts the
//! background reclamation thread; `shutdown` stops and joins it, then frees
//! every idle buffer. Allocation itself never fails: before `init`, after a
//! failed `init` and after `shutdown` requests are still served, the latter two
//! by direct allocation without pooling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use memsys_core::config::PoolConfig;
use memsys_core::hash::HashAccumulator;
use memsys_core::units::MIB;

use crate::error::{Error, Result};
use crate::probe::{MemInfo, MemProbe, ProcMeminfo};
use crate::reclaim::{run_tick, ReclaimPolicy, ReclaimReport, ReclamationLoop, TrimMode};
use crate::sgl::Sgl;
use crate::slab::{self, SizeClass, SizeClassStats, DEFAULT_BUF_SIZE, MAX_CLASS_SIZE, PAGE_SIZE};

/// Reclamation period used when the config leaves it at zero.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2 * 60);
/// Headroom used when neither the config nor the probe can size it.
pub const DEFAULT_MIN_FREE: u64 = 256 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Constructed,
    Running,
    /// `init` hit a probe error in strict mode.
    Failed,
    ShutDown,
}

/// State shared with the reclamation thread.
struct PoolShared {
    name: Arc<str>,
    debug: bool,
    ladder: Vec<Arc<SizeClass>>,
    probe: Box<dyn MemProbe>,
    oversized: AtomicU64,
    ticks: AtomicU64,
    reclaimed_buffers: AtomicU64,
    reclaimed_bytes: AtomicU64,
}

impl PoolShared {
    fn reclaim(&self, policy: &ReclaimPolicy) -> ReclaimReport {
        let report = run_tick(&self.ladder, self.probe.as_ref(), policy, Instant::now());
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.reclaimed_buffers
            .fetch_add(report.released_buffers as u64, Ordering::Relaxed);
        self.reclaimed_bytes
            .fetch_add(report.released_bytes, Ordering::Relaxed);

        if report.released_buffers > 0 {
            tracing::info!(
                pool = %self.name,
                mode = ?report.mode,
                idle_bytes = report.idle_bytes_before,
                released_buffers = report.released_buffers,
                released_bytes = report.released_bytes,
                "reclaimed idle buffers"
            );
        } else {
            tracing::debug!(
                pool = %self.name,
                mode = ?report.mode,
                idle_bytes = report.idle_bytes_before,
                "reclamation tick"
            );
        }
        report
    }

    fn close_classes(&self) -> usize {
        self.ladder.iter().map(|c| c.close()).sum()
    }
}

struct Control {
    state: PoolState,
    policy: Option<ReclaimPolicy>,
    period: Option<Duration>,
    meminfo: Option<MemInfo>,
    reclaimer: Option<ReclamationLoop>,
}

/// Pool-wide snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub state: PoolState,
    pub period_ms: Option<u64>,
    pub min_free_bytes: Option<u64>,
    pub meminfo: Option<MemInfo>,
    pub in_use_buffers: usize,
    pub in_use_bytes: u64,
    pub idle_buffers: usize,
    pub idle_bytes: u64,
    pub oversized_allocations: u64,
    pub reclaim_ticks: u64,
    pub reclaimed_buffers: u64,
    pub reclaimed_bytes: u64,
    pub classes: Vec<SizeClassStats>,
}

impl PoolStats {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Core(e.into()))
    }
}

pub struct MemoryPool {
    config: PoolConfig,
    shared: Arc<PoolShared>,
    control: Mutex<Control>,
}

impl MemoryPool {
    /// Build a pool probing `/proc/meminfo`. Nothing is allocated and no thread
    /// is started until [`MemoryPool::init`].
    pub fn new(config: PoolConfig) -> Self {
        Self::with_probe(config, ProcMeminfo::new())
    }

    pub fn with_probe(config: PoolConfig, probe: impl MemProbe + 'static) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let shared = PoolShared {
            ladder: slab::ladder(&name, config.debug),
            name,
            debug: config.debug,
            probe: Box::new(probe),
            oversized: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            reclaimed_buffers: AtomicU64::new(0),
            reclaimed_bytes: AtomicU64::new(0),
        };
        Self {
            config,
            shared: Arc::new(shared),
            control: Mutex::new(Control {
                state: PoolState::Constructed,
                policy: None,
                period: None,
                meminfo: None,
                reclaimer: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn state(&self) -> PoolState {
        self.control.lock().state
    }

    /// Probe the environment, settle defaults and start reclamation.
    ///
    /// With `ignore_probe_errors` a failed probe is logged and built-in defaults
    /// apply. Without it the probe error is returned and the pool stays
    /// unpooled for good.
    pub fn init(&self, ignore_probe_errors: bool) -> Result<()> {
        let mut control = self.control.lock();
        match control.state {
            PoolState::Constructed => {}
            PoolState::Running => {
                tracing::debug!(pool = %self.shared.name, "init on running pool ignored");
                return Ok(());
            }
            state => {
                tracing::warn!(pool = %self.shared.name, ?state, "init on stopped pool ignored");
                return Ok(());
            }
        }

        self.config.validate()?;

        let meminfo = match self.shared.probe.probe() {
            Ok(info) => Some(info),
            Err(e) if ignore_probe_errors => {
                tracing::warn!(pool = %self.shared.name, error = %e, "memory probe failed; using built-in defaults");
                None
            }
            Err(e) => {
                tracing::error!(pool = %self.shared.name, error = %e, "memory probe failed");
                control.state = PoolState::Failed;
                self.shared.close_classes();
                return Err(e);
            }
        };

        let min_free = if self.config.min_free_bytes > 0 {
            self.config.min_free_bytes
        } else {
            meminfo
                .map(|m| m.total / 4)
                .filter(|&quarter| quarter > 0)
                .unwrap_or(DEFAULT_MIN_FREE)
        };
        if let Some(info) = meminfo {
            if info.available < min_free {
                tracing::warn!(
                    pool = %self.shared.name,
                    available = info.available,
                    min_free,
                    "available memory already below min_free"
                );
            }
        }

        let period = if self.config.period_ms == 0 {
            DEFAULT_PERIOD
        } else {
            self.config.period()
        };
        let policy = ReclaimPolicy {
            min_free,
            fraction_denom: self.config.reclaim_fraction_denom,
            stale_after: period.saturating_mul(self.config.stale_after_periods),
        };

        let shared = Arc::clone(&self.shared);
        let spawned = ReclamationLoop::spawn(
            format!("memsys-reclaim-{}", self.shared.name),
            period,
            move || {
                shared.reclaim(&policy);
            },
        );
        let reclaimer = match spawned {
            Ok(reclaimer) => reclaimer,
            Err(source) => {
                tracing::error!(pool = %self.shared.name, error = %source, "failed to start reclamation thread");
                control.state = PoolState::Failed;
                self.shared.close_classes();
                return Err(Error::Spawn {
                    pool: self.config.name.clone(),
                    source,
                });
            }
        };

        control.state = PoolState::Running;
        control.policy = Some(policy);
        control.period = Some(period);
        control.meminfo = meminfo;
        control.reclaimer = Some(reclaimer);

        tracing::info!(
            pool = %self.shared.name,
            period_ms = period.as_millis() as u64,
            min_free,
            debug = self.shared.debug,
            "memory pool initialized"
        );
        Ok(())
    }

    /// Stop reclamation and free idle memory. Idempotent; returns once the
    /// reclamation thread has exited.
    pub fn shutdown(&self) {
        let mut control = self.control.lock();
        if control.state == PoolState::ShutDown {
            return;
        }
        control.state = PoolState::ShutDown;
        if let Some(reclaimer) = control.reclaimer.take() {
            reclaimer.stop();
        }

        let freed = self.shared.close_classes();
        let leaked: usize = self.shared.ladder.iter().map(|c| c.in_use()).sum();
        if leaked > 0 {
            tracing::warn!(
                pool = %self.shared.name,
                buffers = leaked,
                "buffers still held by live scatter-gather buffers at shutdown"
            );
        }
        tracing::info!(pool = %self.shared.name, freed_idle = freed, "memory pool shut down");
    }

    /// Smallest ladder class with capacity >= `size` (the default class for 0);
    /// an exact-sized, unpooled class past the end of the ladder.
    pub fn select_size_class(&self, size: usize) -> Arc<SizeClass> {
        let size = if size == 0 { DEFAULT_BUF_SIZE } else { size };
        if size > MAX_CLASS_SIZE {
            self.shared.oversized.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(pool = %self.shared.name, size, "oversized request bypasses the class ladder");
            return Arc::new(SizeClass::new(
                size,
                false,
                self.shared.debug,
                Arc::clone(&self.shared.name),
            ));
        }
        let idx = (size + PAGE_SIZE - 1) / PAGE_SIZE - 1;
        Arc::clone(&self.shared.ladder[idx])
    }

    /// Ladder classes, smallest first.
    pub fn size_classes(&self) -> &[Arc<SizeClass>] {
        &self.shared.ladder
    }

    /// Class an SGL grows by. Hints past the ladder use the largest pooled
    /// class; the exact-size bypass is for single buffers only.
    fn sgl_class(&self, size_hint: usize) -> Arc<SizeClass> {
        if size_hint > MAX_CLASS_SIZE {
            return Arc::clone(&self.shared.ladder[self.shared.ladder.len() - 1]);
        }
        self.select_size_class(size_hint)
    }

    /// Scatter-gather buffer growing by chunks of the class chosen for `size_hint`.
    pub fn new_sgl(&self, size_hint: usize) -> Sgl {
        Sgl::new(self.sgl_class(size_hint), None)
    }

    pub fn new_sgl_with_hash(&self, size_hint: usize, hash: Box<dyn HashAccumulator>) -> Sgl {
        Sgl::new(self.sgl_class(size_hint), Some(hash))
    }

    /// Run one reclamation pass now, on the caller's thread. A shut-down pool
    /// reports an empty pass without touching its classes.
    pub fn reclaim_now(&self) -> ReclaimReport {
        // held through the tick so shutdown cannot interleave with it
        let control = self.control.lock();
        if control.state == PoolState::ShutDown {
            tracing::debug!(pool = %self.shared.name, "reclaim_now on shut-down pool ignored");
            return ReclaimReport {
                mode: TrimMode::Idle,
                idle_bytes_before: 0,
                available: None,
                released_buffers: 0,
                released_bytes: 0,
            };
        }
        let policy = control.policy.unwrap_or(ReclaimPolicy {
            min_free: if self.config.min_free_bytes > 0 {
                self.config.min_free_bytes
            } else {
                DEFAULT_MIN_FREE
            },
            fraction_denom: self.config.reclaim_fraction_denom,
            stale_after: self
                .config
                .period()
                .saturating_mul(self.config.stale_after_periods),
        });
        self.shared.reclaim(&policy)
    }

    pub fn stats(&self) -> PoolStats {
        let (state, period, policy, meminfo) = {
            let control = self.control.lock();
            (control.state, control.period, control.policy, control.meminfo)
        };
        let classes: Vec<SizeClassStats> = self.shared.ladder.iter().map(|c| c.stats()).collect();
        PoolStats {
            name: self.config.name.clone(),
            state,
            period_ms: period.map(|p| p.as_millis() as u64),
            min_free_bytes: policy.map(|p| p.min_free),
            meminfo,
            in_use_buffers: classes.iter().map(|c| c.in_use).sum(),
            in_use_bytes: classes.iter().map(|c| (c.in_use * c.capacity) as u64).sum(),
            idle_buffers: classes.iter().map(|c| c.idle).sum(),
            idle_bytes: classes.iter().map(|c| c.idle_bytes).sum(),
            oversized_allocations: self.shared.oversized.load(Ordering::Relaxed),
            reclaim_ticks: self.shared.ticks.load(Ordering::Relaxed),
            reclaimed_buffers: self.shared.reclaimed_buffers.load(Ordering::Relaxed),
            reclaimed_bytes: self.shared.reclaimed_bytes.load(Ordering::Relaxed),
            classes,
        }
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;
    use memsys_core::units::GIB;

    fn pool(probe: StaticProbe) -> MemoryPool {
        MemoryPool::with_probe(
            PoolConfig::new("unit", Duration::from_secs(3600), 0, true),
            probe,
        )
    }

    fn roomy() -> StaticProbe {
        StaticProbe::new(MemInfo {
            total: 16 * GIB,
            available: 8 * GIB,
        })
    }

    #[test]
    fn selects_smallest_fitting_class() {
        let p = pool(roomy());
        assert_eq!(p.select_size_class(1).capacity(), PAGE_SIZE);
        assert_eq!(p.select_size_class(PAGE_SIZE).capacity(), PAGE_SIZE);
        assert_eq!(p.select_size_class(PAGE_SIZE + 1).capacity(), 2 * PAGE_SIZE);
        assert_eq!(p.select_size_class(0).capacity(), DEFAULT_BUF_SIZE);
        assert_eq!(p.select_size_class(MAX_CLASS_SIZE).capacity(), MAX_CLASS_SIZE);
        assert!(p.select_size_class(MAX_CLASS_SIZE).is_pooled());
    }

    #[test]
    fn oversized_requests_get_exact_unpooled_class() {
        let p = pool(roomy());
        let class = p.select_size_class(MAX_CLASS_SIZE + 1);
        assert_eq!(class.capacity(), MAX_CLASS_SIZE + 1);
        assert!(!class.is_pooled());
        assert_eq!(p.stats().oversized_allocations, 1);
    }

    #[test]
    fn same_size_routes_to_same_class() {
        let p = pool(roomy());
        let a = p.select_size_class(10_000);
        let b = p.select_size_class(12_000);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn init_sizes_min_free_from_probe() {
        let p = pool(roomy());
        p.init(false).unwrap();
        let stats = p.stats();
        assert_eq!(stats.state, PoolState::Running);
        assert_eq!(stats.min_free_bytes, Some(4 * GIB));
        assert_eq!(stats.period_ms, Some(3_600_000));
        p.shutdown();
    }

    #[test]
    fn strict_init_surfaces_probe_error() {
        let p = pool(StaticProbe::failing("no meminfo"));
        assert!(matches!(p.init(false), Err(Error::Probe(_))));
        assert_eq!(p.state(), PoolState::Failed);

        // still serves allocations, just without pooling
        let mut sgl = p.new_sgl(PAGE_SIZE);
        sgl.append(b"abc").unwrap();
        sgl.free();
        assert_eq!(p.stats().idle_buffers, 0);
    }

    #[test]
    fn lenient_init_uses_defaults() {
        let p = pool(StaticProbe::failing("no meminfo"));
        p.init(true).unwrap();
        let stats = p.stats();
        assert_eq!(stats.state, PoolState::Running);
        assert_eq!(stats.min_free_bytes, Some(DEFAULT_MIN_FREE));
        assert!(stats.meminfo.is_none());
    }

    #[test]
    fn init_twice_is_harmless() {
        let p = pool(roomy());
        p.init(false).unwrap();
        p.init(false).unwrap();
        assert_eq!(p.state(), PoolState::Running);
    }

    #[test]
    fn shutdown_is_idempotent_and_frees_idle() {
        let p = pool(roomy());
        p.init(false).unwrap();
        let mut sgl = p.new_sgl(PAGE_SIZE);
        sgl.append(&vec![1u8; 3 * PAGE_SIZE]).unwrap();
        sgl.free();
        assert_eq!(p.stats().idle_buffers, 3);
        p.shutdown();
        p.shutdown();
        let stats = p.stats();
        assert_eq!(stats.state, PoolState::ShutDown);
        assert_eq!(stats.idle_buffers, 0);
        // init after shutdown is ignored
        p.init(false).unwrap();
        assert_eq!(p.state(), PoolState::ShutDown);
    }

    #[test]
    fn reclaim_now_trims_under_pressure() {
        let probe = std::sync::Arc::new(roomy());
        let p = MemoryPool::with_probe(
            PoolConfig::new("unit", Duration::from_secs(3600), GIB, false),
            std::sync::Arc::clone(&probe),
        );
        let mut sgl = p.new_sgl(PAGE_SIZE);
        sgl.append(&vec![0u8; 8 * PAGE_SIZE]).unwrap();
        sgl.free();

        let calm = p.reclaim_now();
        assert_eq!(calm.released_buffers, 0);

        probe.set_available(0);
        let report = p.reclaim_now();
        assert_eq!(report.released_buffers, 2);
        let stats = p.stats();
        assert_eq!(stats.idle_buffers, 6);
        assert_eq!(stats.reclaimed_buffers, 2);
        assert_eq!(stats.reclaim_ticks, 2);
    }

    #[test]
    fn oversized_sgl_hint_grows_by_pooled_max_class() {
        let p = pool(roomy());
        let mut sgl = p.new_sgl(MIB as usize + 1);
        assert!(sgl.size_class().is_pooled());
        assert_eq!(sgl.size_class().capacity(), MAX_CLASS_SIZE);

        sgl.append(&vec![5u8; MIB as usize + 2]).unwrap();
        assert_eq!(sgl.chunk_count(), 9);
        assert_eq!(sgl.capacity(), 9 * MAX_CLASS_SIZE);
        sgl.free();

        let stats = p.stats();
        assert_eq!(stats.idle_buffers, 9);
        assert_eq!(stats.oversized_allocations, 0);
    }

    #[test]
    fn reclaim_now_after_shutdown_is_empty() {
        let probe = std::sync::Arc::new(StaticProbe::new(MemInfo {
            total: 16 * GIB,
            available: 0,
        }));
        let p = MemoryPool::with_probe(
            PoolConfig::new("unit", Duration::from_secs(3600), GIB, false),
            std::sync::Arc::clone(&probe),
        );
        p.init(false).unwrap();
        p.shutdown();
        let ticks = p.stats().reclaim_ticks;

        let report = p.reclaim_now();
        assert_eq!(report.mode, TrimMode::Idle);
        assert_eq!(report.released_buffers, 0);
        assert_eq!(p.stats().reclaim_ticks, ticks);
    }

    #[test]
    fn stats_serialize_to_json() {
        let p = pool(roomy());
        let json = p.stats().to_json().unwrap();
        assert!(json.contains("\"name\": \"unit\""));
        assert!(json.contains("\"state\": \"constructed\""));
    }
}
