//! Convenient re-exports for downstream crates.

pub use crate::config::PoolConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::{
    digest_bytes, Blake3Accumulator, Digest, HashAccumulator, HashAlgorithm, HashWriter,
    Sha256Accumulator, Xxh64Accumulator,
};
pub use crate::pattern::{seeded_size, SeededBytes};
pub use crate::units::{format_size, parse_size, GIB, KIB, MIB};
