use std::io;

use thiserror::Error;

/// Result type local to memsys-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("environment probe failed: {0}")]
    Probe(String),

    #[error("failed to start reclamation thread for pool '{pool}': {source}")]
    Spawn {
        pool: String,
        #[source]
        source: io::Error,
    },

    /// The attached accumulator rejected an update; `written` bytes were stored
    /// and hashed before the failure.
    #[error("hash accumulator failed after {written} bytes: {source}")]
    HashAccumulator {
        written: u64,
        #[source]
        source: memsys_core::Error,
    },

    #[error("reading source failed after {written} bytes: {source}")]
    Source {
        written: u64,
        #[source]
        source: io::Error,
    },

    #[error("downstream sink failed after {delivered} bytes: {source}")]
    Downstream {
        delivered: u64,
        #[source]
        source: io::Error,
    },

    #[error("buffer of {capacity} bytes from size class #{origin} released to size class #{class}")]
    ForeignBuffer {
        origin: u64,
        class: u64,
        capacity: usize,
    },

    #[error(transparent)]
    Core(#[from] memsys_core::Error),
}
