//! Streaming hash accumulators attached to scatter-gather buffers.
//!
//! An accumulator is fed bytes in strict order and can be finalized to a
//! [`Digest`] at any point without being consumed. Two accumulators of the same
//! algorithm fed the same logical bytes must produce equal digests no matter
//! how the input was split into `update` calls.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{Error, Result};

/// Finalized digest tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: &'static str,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn new(algorithm: &'static str, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Leading eight bytes as a little-endian integer (zero padded).
    pub fn as_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        let n = self.bytes.len().min(8);
        word[..n].copy_from_slice(&self.bytes[..n]);
        u64::from_le_bytes(word)
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(self.bytes.len() * 2);
        for b in &self.bytes {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Incremental digest capability.
///
/// `update` is all-or-nothing: when it returns an error the accumulator state
/// must not reflect any byte of that call.
pub trait HashAccumulator: Send {
    /// Short stable name, e.g. `"blake3"`.
    fn algorithm(&self) -> &'static str;

    fn update(&mut self, bytes: &[u8]) -> Result<()>;

    /// Digest over everything accepted since creation or the last `reset`.
    fn digest(&self) -> Digest;

    /// Return to the zero state.
    fn reset(&mut self);
}

impl<H: HashAccumulator + ?Sized> HashAccumulator for Box<H> {
    fn algorithm(&self) -> &'static str {
        (**self).algorithm()
    }
    fn update(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).update(bytes)
    }
    fn digest(&self) -> Digest {
        (**self).digest()
    }
    fn reset(&mut self) {
        (**self).reset()
    }
}

/// BLAKE3 accumulator.
#[derive(Debug, Clone, Default)]
pub struct Blake3Accumulator {
    state: blake3::Hasher,
}

impl Blake3Accumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashAccumulator for Blake3Accumulator {
    fn algorithm(&self) -> &'static str {
        "blake3"
    }

    fn update(&mut self, bytes: &[u8]) -> Result<()> {
        self.state.update(bytes);
        Ok(())
    }

    fn digest(&self) -> Digest {
        Digest::new(self.algorithm(), self.state.finalize().as_bytes().to_vec())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// SHA-256 accumulator.
#[derive(Debug, Clone, Default)]
pub struct Sha256Accumulator {
    state: sha2::Sha256,
}

impl Sha256Accumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashAccumulator for Sha256Accumulator {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn update(&mut self, bytes: &[u8]) -> Result<()> {
        self.state.update(bytes);
        Ok(())
    }

    fn digest(&self) -> Digest {
        // finalize consumes, so work on a copy of the running state
        Digest::new(self.algorithm(), self.state.clone().finalize().to_vec())
    }

    fn reset(&mut self) {
        self.state = sha2::Sha256::new();
    }
}

/// 64-bit xxHash (XXH64, seed 0). The digest holds the hash little-endian,
/// so [`Digest::as_u64`] returns the plain XXH64 value.
pub struct Xxh64Accumulator {
    state: xxhash_rust::xxh64::Xxh64,
}

impl Xxh64Accumulator {
    pub fn new() -> Self {
        Self {
            state: xxhash_rust::xxh64::Xxh64::new(0),
        }
    }
}

impl Default for Xxh64Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Xxh64Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xxh64Accumulator")
            .field("current", &self.state.digest())
            .finish()
    }
}

impl HashAccumulator for Xxh64Accumulator {
    fn algorithm(&self) -> &'static str {
        "xxh64"
    }

    fn update(&mut self, bytes: &[u8]) -> Result<()> {
        self.state.update(bytes);
        Ok(())
    }

    fn digest(&self) -> Digest {
        Digest::new(self.algorithm(), self.state.digest().to_le_bytes().to_vec())
    }

    fn reset(&mut self) {
        self.state.reset(0);
    }
}

/// Algorithms selectable from configuration or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
    Xxh64,
}

impl HashAlgorithm {
    pub fn accumulator(self) -> Box<dyn HashAccumulator> {
        match self {
            HashAlgorithm::Blake3 => Box::new(Blake3Accumulator::new()),
            HashAlgorithm::Sha256 => Box::new(Sha256Accumulator::new()),
            HashAlgorithm::Xxh64 => Box::new(Xxh64Accumulator::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Xxh64 => "xxh64",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "xxh64" | "xxhash64" => Ok(HashAlgorithm::Xxh64),
            other => Err(Error::Config(format!("unknown hash algorithm '{other}'"))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapts any accumulator into an `io::Write` sink so it can sit at the end of
/// `io::copy` and friends.
pub struct HashWriter<H> {
    inner: H,
}

impl<H: HashAccumulator> HashWriter<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn digest(&self) -> Digest {
        self.inner.digest()
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: HashAccumulator> io::Write for HashWriter<H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .update(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One-shot digest of `bytes` with a fresh accumulator of `algorithm`.
pub fn digest_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> Result<Digest> {
    let mut acc = algorithm.accumulator();
    acc.update(bytes)?;
    Ok(acc.digest())
}
