//! Periodic trimming of idle pooled memory.
//!
//! Each tick sums idle bytes across the ladder and compares them with the
//! headroom left above `min_free`:
//!
//! - headroom is `available - min_free` when the probe answers, `min_free`
//!   otherwise;
//! - idle bytes above headroom is **pressure**: every class frees
//!   `max(1, idle / fraction_denom)` of its longest-idle buffers;
//! - otherwise only buffers idle for at least `stale_after` are freed, with the
//!   same per-class bound.
//!
//! A class is never drained to zero in one tick unless it holds a single idle
//! buffer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::probe::MemProbe;
use crate::slab::SizeClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimPolicy {
    pub min_free: u64,
    pub fraction_denom: usize,
    pub stale_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    /// Nothing idle, nothing to do.
    Idle,
    /// Only long-idle buffers are freed.
    Stale,
    /// Idle bytes exceed headroom; a bounded fraction of every class is freed.
    Pressure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub mode: TrimMode,
    pub idle_bytes_before: u64,
    pub available: Option<u64>,
    pub released_buffers: usize,
    pub released_bytes: u64,
}

impl ReclaimPolicy {
    pub fn headroom(&self, available: Option<u64>) -> u64 {
        match available {
            Some(avail) => avail.saturating_sub(self.min_free),
            None => self.min_free,
        }
    }

    pub fn mode(&self, idle_bytes: u64, available: Option<u64>) -> TrimMode {
        if idle_bytes == 0 {
            TrimMode::Idle
        } else if idle_bytes > self.headroom(available) {
            TrimMode::Pressure
        } else {
            TrimMode::Stale
        }
    }

    /// Most buffers one class may free in a single tick.
    pub fn per_class_bound(&self, idle: usize) -> usize {
        if idle == 0 {
            0
        } else {
            (idle / self.fraction_denom.max(1)).max(1)
        }
    }
}

/// One reclamation pass over `classes`.
pub(crate) fn run_tick(
    classes: &[Arc<SizeClass>],
    probe: &dyn MemProbe,
    policy: &ReclaimPolicy,
    now: Instant,
) -> ReclaimReport {
    let idle_bytes_before: u64 = classes.iter().map(|c| c.idle_bytes()).sum();
    let available = match probe.probe() {
        Ok(info) => Some(info.available),
        Err(e) => {
            tracing::debug!(error = %e, "probe failed during reclamation; using min_free as headroom");
            None
        }
    };
    let mode = policy.mode(idle_bytes_before, available);

    let cutoff = match mode {
        TrimMode::Idle => None,
        TrimMode::Pressure => Some(None),
        // a process younger than stale_after has nothing stale yet
        TrimMode::Stale => now.checked_sub(policy.stale_after).map(Some),
    };

    let mut released_buffers = 0;
    let mut released_bytes = 0u64;
    if let Some(cutoff) = cutoff {
        for class in classes {
            let bound = policy.per_class_bound(class.idle_count());
            if bound == 0 {
                continue;
            }
            let n = class.reclaim(bound, cutoff);
            released_buffers += n;
            released_bytes += (n * class.capacity()) as u64;
        }
    }

    ReclaimReport {
        mode,
        idle_bytes_before,
        available,
        released_buffers,
        released_bytes,
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

/// Background thread running a tick every `period` until stopped.
pub(crate) struct ReclamationLoop {
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ReclamationLoop {
    pub(crate) fn spawn<F>(thread_name: String, period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        });
        let signal = Arc::clone(&stop);

        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            let mut stopped = signal.stopped.lock();
            loop {
                let deadline = Instant::now() + period;
                while !*stopped {
                    if signal.cv.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                if *stopped {
                    break;
                }
                // run the tick unlocked so stop() can flag us mid-tick and then wait in join
                drop(stopped);
                tick();
                stopped = signal.stopped.lock();
            }
        })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it, including any tick in flight.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut stopped = self.stop.stopped.lock();
            *stopped = true;
        }
        self.stop.cv.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("reclamation thread panicked");
            }
        }
    }
}

impl Drop for ReclamationLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
