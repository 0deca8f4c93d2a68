#![forbid(unsafe_code)]
//! memsys-core: configuration, byte-size units, and streaming hash accumulators.
//!
//! Nothing here allocates pooled memory or spawns threads; the slab pool and
//! scatter-gather buffers live in `memsys-mem` and depend on these types.

pub mod config;
pub mod error;
pub mod hash;
pub mod pattern;
pub mod prelude;
pub mod units;

pub use config::PoolConfig;
pub use error::{Error, Result};
