#![forbid(unsafe_code)]
//! memsys: size-classed buffer pooling and scatter-gather buffers.
//!
//! Facade over the workspace crates. Most users want [`MemoryPool`] and
//! [`Sgl`]; the hash accumulators and byte-size helpers live in [`core`].

pub use memsys_core as core;
pub use memsys_mem as mem;

pub use memsys_core::hash::{Digest, HashAccumulator, HashAlgorithm, HashWriter};
pub use memsys_core::PoolConfig;
pub use memsys_mem::{Error, MemoryPool, PoolState, PoolStats, Result, Sgl, SizeClass};
