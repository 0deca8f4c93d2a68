#![forbid(unsafe_code)]
//! memsys-mem: size-classed buffer pool, reclamation, and scatter-gather buffers.
//!
//! All pooled memory in the service flows through a [`MemoryPool`]: it routes
//! requests to a [`SizeClass`] on its ladder, hands out [`Sgl`]s that grow by
//! whole chunks of that class, and trims idle chunks in the background.
//! Allocation never fails and never waits; only pool `init` can return an
//! error.

pub mod error;
pub mod pool;
pub mod probe;
pub mod reclaim;
pub mod sgl;
pub mod slab;
pub mod tracking;

pub use error::{Error, Result};
pub use pool::{MemoryPool, PoolState, PoolStats};
pub use probe::{MemInfo, MemProbe, ProcMeminfo, StaticProbe};
pub use reclaim::{ReclaimPolicy, ReclaimReport, TrimMode};
pub use sgl::Sgl;
pub use slab::{Buffer, SizeClass, SizeClassStats};
