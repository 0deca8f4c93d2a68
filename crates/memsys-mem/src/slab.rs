//! Size classes: pools of reusable fixed-capacity buffers.
//!
//! A [`SizeClass`] hands out [`Buffer`]s from its idle list (most recently
//! idled first, for cache warmth) and allocates fresh ones when the list is
//! empty, so `acquire` never fails and never waits. Released buffers go back
//! to the tail of the list; reclamation trims from the head, which is where
//! the longest-idle buffers sit.
//!
//! Every buffer remembers which class created it. A class only ever accepts
//! its own buffers back.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::tracking::HighWaterMark;

/// Granularity of the class ladder.
pub const PAGE_SIZE: usize = 4 * 1024;
/// Largest pooled capacity; bigger requests get exact-sized unpooled buffers.
pub const MAX_CLASS_SIZE: usize = 128 * 1024;
/// Number of classes in a pool's ladder.
pub const NUM_CLASSES: usize = MAX_CLASS_SIZE / PAGE_SIZE;
/// Class used when a caller gives no size hint.
pub const DEFAULT_BUF_SIZE: usize = 32 * 1024;

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-capacity block of memory. Not `Clone`: it always has exactly one owner.
pub struct Buffer {
    data: Box<[u8]>,
    origin: u64,
    /// In-use counter of the origin class.
    home: Arc<AtomicUsize>,
}

impl Buffer {
    fn new(capacity: usize, origin: u64, home: Arc<AtomicUsize>) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            origin,
            home,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Id of the size class that allocated this buffer.
    pub fn origin(&self) -> u64 {
        self.origin
    }
}

impl Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.data.len())
            .field("origin", &self.origin)
            .finish()
    }
}

struct IdleBuffer {
    buf: Buffer,
    since: Instant,
}

struct FreeList {
    idle: VecDeque<IdleBuffer>,
    /// Set on pool shutdown (or failed init); releases are freed instead of pooled.
    closed: bool,
}

/// Point-in-time counters for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeClassStats {
    pub capacity: usize,
    pub pooled: bool,
    pub in_use: usize,
    pub idle: usize,
    pub idle_bytes: u64,
    pub high_water: usize,
    pub allocated: u64,
    pub reused: u64,
    pub reclaimed: u64,
    pub misuse: u64,
}

pub struct SizeClass {
    id: u64,
    capacity: usize,
    pooled: bool,
    debug: bool,
    pool: Arc<str>,
    free: Mutex<FreeList>,
    in_use: Arc<AtomicUsize>,
    high_water: HighWaterMark,
    allocated: AtomicU64,
    reused: AtomicU64,
    reclaimed: AtomicU64,
    misuse: AtomicU64,
}

impl SizeClass {
    pub(crate) fn new(capacity: usize, pooled: bool, debug: bool, pool: Arc<str>) -> Self {
        Self {
            id: NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            pooled,
            debug,
            pool,
            free: Mutex::new(FreeList {
                idle: VecDeque::new(),
                closed: false,
            }),
            in_use: Arc::new(AtomicUsize::new(0)),
            high_water: HighWaterMark::new(),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            misuse: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// False for the exact-sized classes created for oversized requests.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Take an idle buffer, or allocate one. Never fails, never blocks on anything
    /// but the class's own short critical section.
    pub fn acquire(&self) -> Buffer {
        let recycled = if self.pooled {
            self.free.lock().idle.pop_back().map(|idle| idle.buf)
        } else {
            None
        };

        let buf = match recycled {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Buffer::new(self.capacity, self.id, Arc::clone(&self.in_use))
            }
        };

        let now = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.high_water.record(now);
        buf
    }

    /// Hand a buffer back. Buffers that did not come from this class are
    /// refused: reported as [`Error::ForeignBuffer`] in debug mode, dropped
    /// quietly otherwise. Either way the buffer is freed and its origin class
    /// stops counting it as in use.
    pub fn release(&self, buf: Buffer) -> Result<()> {
        if buf.origin != self.id {
            self.misuse.fetch_add(1, Ordering::Relaxed);
            buf.home.fetch_sub(1, Ordering::AcqRel);
            if self.debug {
                tracing::error!(
                    pool = %self.pool,
                    class = self.capacity,
                    origin = buf.origin,
                    buffer = buf.capacity(),
                    "foreign buffer released to size class"
                );
                return Err(Error::ForeignBuffer {
                    origin: buf.origin,
                    class: self.id,
                    capacity: buf.capacity(),
                });
            }
            return Ok(());
        }

        self.in_use.fetch_sub(1, Ordering::AcqRel);

        if !self.pooled {
            return Ok(());
        }

        let mut free = self.free.lock();
        if free.closed {
            drop(free);
            if self.debug {
                tracing::warn!(
                    pool = %self.pool,
                    class = self.capacity,
                    "buffer released after shutdown; freeing it"
                );
            }
            return Ok(());
        }
        free.idle.push_back(IdleBuffer {
            buf,
            since: Instant::now(),
        });
        Ok(())
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.free.lock().idle.len()
    }

    pub fn idle_bytes(&self) -> u64 {
        (self.idle_count() * self.capacity) as u64
    }

    pub fn stats(&self) -> SizeClassStats {
        let idle = self.idle_count();
        SizeClassStats {
            capacity: self.capacity,
            pooled: self.pooled,
            in_use: self.in_use(),
            idle,
            idle_bytes: (idle * self.capacity) as u64,
            high_water: self.high_water.peak(),
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            misuse: self.misuse.load(Ordering::Relaxed),
        }
    }

    /// Free up to `max` idle buffers, longest-idle first. With `idle_before`,
    /// stop at the first buffer that went idle after that instant.
    /// Returns the number of buffers freed.
    pub(crate) fn reclaim(&self, max: usize, idle_before: Option<Instant>) -> usize {
        let victims: Vec<IdleBuffer> = {
            let mut free = self.free.lock();
            let mut out = Vec::new();
            while out.len() < max {
                match free.idle.front() {
                    Some(front) if idle_before.map_or(true, |cut| front.since <= cut) => {}
                    _ => break,
                }
                if let Some(idle) = free.idle.pop_front() {
                    out.push(idle);
                }
            }
            out
        };
        // deallocate outside the lock
        let n = victims.len();
        drop(victims);
        if n > 0 {
            self.reclaimed.fetch_add(n as u64, Ordering::Relaxed);
        }
        n
    }

    /// Stop pooling and free every idle buffer. Returns how many were freed.
    pub(crate) fn close(&self) -> usize {
        let drained: VecDeque<IdleBuffer> = {
            let mut free = self.free.lock();
            free.closed = true;
            std::mem::take(&mut free.idle)
        };
        drained.len()
    }
}

impl fmt::Debug for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeClass")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("capacity", &self.capacity)
            .field("pooled", &self.pooled)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// Build the ladder `PAGE_SIZE, 2*PAGE_SIZE, ..., MAX_CLASS_SIZE`.
pub(crate) fn ladder(pool: &Arc<str>, debug: bool) -> Vec<Arc<SizeClass>> {
    (1..=NUM_CLASSES)
        .map(|i| Arc::new(SizeClass::new(i * PAGE_SIZE, true, debug, Arc::clone(pool))))
        .collect()
}
