//! Scatter-gather buffer: one logical, growable byte stream over pooled chunks.
//!
//! An [`Sgl`] draws every chunk from a single [`SizeClass`], appends at a write
//! offset and drains from a read offset. Chunk boundaries never show through
//! the byte stream. When a [`HashAccumulator`] is attached, every byte counted
//! as written has also been fed to it, in order, inside the same call.
//!
//! Usage is phase separated: one producer writes everything, then at most one
//! consumer reads it back once. All mutation goes through `&mut self`, so
//! overlapping writers or a writer racing a reader do not compile.

use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use memsys_core::hash::{Digest, HashAccumulator};

use crate::error::{Error, Result};
use crate::slab::{Buffer, SizeClass};

pub struct Sgl {
    class: Arc<SizeClass>,
    chunks: Vec<Buffer>,
    woff: usize,
    roff: usize,
    hash: Option<Box<dyn HashAccumulator>>,
}

impl Sgl {
    pub(crate) fn new(class: Arc<SizeClass>, hash: Option<Box<dyn HashAccumulator>>) -> Self {
        Self {
            class,
            chunks: Vec::new(),
            woff: 0,
            roff: 0,
            hash,
        }
    }

    /// Bytes written (logical length).
    pub fn len(&self) -> usize {
        self.woff
    }

    pub fn is_empty(&self) -> bool {
        self.woff == 0
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.woff - self.roff
    }

    /// Total capacity of the chunks currently held.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.class.capacity()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Class backing this buffer's chunks. Acquiring a copy buffer from it
    /// lines up caller-side copies with chunk boundaries.
    pub fn size_class(&self) -> &Arc<SizeClass> {
        &self.class
    }

    pub fn has_hash(&self) -> bool {
        self.hash.is_some()
    }

    /// Position of byte `off` as (chunk index, offset in chunk).
    fn locate(&self, off: usize) -> (usize, usize) {
        let cap = self.class.capacity();
        (off / cap, off % cap)
    }

    /// Make sure the chunk holding the write offset exists.
    fn ensure_write_chunk(&mut self) -> (usize, usize) {
        let (idx, off) = self.locate(self.woff);
        if idx == self.chunks.len() {
            self.chunks.push(self.class.acquire());
        }
        (idx, off)
    }

    /// Append `data`, growing by whole chunks. On accumulator failure the
    /// error carries how many bytes were stored and hashed; the write offset
    /// and the hash state both stop there.
    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        let cap = self.class.capacity();
        let mut written = 0;
        while written < data.len() {
            let (idx, off) = self.ensure_write_chunk();
            let n = (cap - off).min(data.len() - written);
            let piece = &data[written..written + n];
            self.chunks[idx][off..off + n].copy_from_slice(piece);
            if let Some(hash) = self.hash.as_mut() {
                if let Err(source) = hash.update(piece) {
                    return Err(Error::HashAccumulator {
                        written: written as u64,
                        source,
                    });
                }
            }
            self.woff += n;
            written += n;
        }
        Ok(written)
    }

    /// Fill straight from `src` into chunk memory until it reports end of data.
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<u64> {
        let cap = self.class.capacity();
        let mut total = 0u64;
        loop {
            let (idx, off) = self.ensure_write_chunk();
            let n = match src.read(&mut self.chunks[idx][off..cap]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::Source {
                        written: total,
                        source,
                    })
                }
            };
            if let Some(hash) = self.hash.as_mut() {
                if let Err(source) = hash.update(&self.chunks[idx][off..off + n]) {
                    return Err(Error::HashAccumulator {
                        written: total,
                        source,
                    });
                }
            }
            self.woff += n;
            total += n as u64;
        }
        Ok(total)
    }

    /// Drain the unread bytes into `sink`. On failure the error reports exactly
    /// how many bytes the sink accepted; those bytes count as read.
    pub fn drain_into<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        let mut delivered = 0u64;
        while self.roff < self.woff {
            let (idx, off) = self.locate(self.roff);
            let len = (self.class.capacity() - off).min(self.woff - self.roff);
            match sink.write(&self.chunks[idx][off..off + len]) {
                Ok(0) => {
                    return Err(Error::Downstream {
                        delivered,
                        source: io::Error::new(io::ErrorKind::WriteZero, "sink accepted zero bytes"),
                    })
                }
                Ok(n) => {
                    self.roff += n;
                    delivered += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::Downstream { delivered, source }),
            }
        }
        Ok(delivered)
    }

    /// Digest of every byte written so far, or `None` without an accumulator.
    pub fn compute_hash(&self) -> Option<Digest> {
        self.hash.as_ref().map(|h| h.digest())
    }

    /// Written bytes, chunk by chunk. Does not move the read offset.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let cap = self.class.capacity();
        let len = self.woff;
        self.chunks.iter().enumerate().map_while(move |(i, chunk)| {
            let start = i * cap;
            (start < len).then(|| &chunk[..(len - start).min(cap)])
        })
    }

    /// Copy of all written bytes. Does not move the read offset.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.woff);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Forget the contents but keep the chunks for reuse.
    pub fn reset(&mut self) {
        self.woff = 0;
        self.roff = 0;
        if let Some(hash) = self.hash.as_mut() {
            hash.reset();
        }
    }

    /// Return every chunk to its size class.
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for Sgl {
    fn drop(&mut self) {
        for buf in self.chunks.drain(..) {
            if let Err(e) = self.class.release(buf) {
                tracing::warn!(error = %e, "failed to return chunk to its size class");
            }
        }
    }
}

impl Write for Sgl {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.append(buf) {
            Ok(n) => Ok(n),
            Err(Error::HashAccumulator { written, .. }) if written > 0 => Ok(written as usize),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Sgl {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let cap = self.class.capacity();
        let mut n = 0;
        while n < dst.len() && self.roff < self.woff {
            let (idx, off) = self.locate(self.roff);
            let len = (cap - off).min(self.woff - self.roff).min(dst.len() - n);
            dst[n..n + len].copy_from_slice(&self.chunks[idx][off..off + len]);
            self.roff += len;
            n += len;
        }
        Ok(n)
    }
}

impl BufRead for Sgl {
    /// Unread part of the current chunk; empty at end of data.
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.roff == self.woff {
            return Ok(&[]);
        }
        let (idx, off) = self.locate(self.roff);
        let len = (self.class.capacity() - off).min(self.woff - self.roff);
        Ok(&self.chunks[idx][off..off + len])
    }

    fn consume(&mut self, amt: usize) {
        self.roff = (self.roff + amt).min(self.woff);
    }
}

impl fmt::Debug for Sgl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sgl")
            .field("class", &self.class.capacity())
            .field("chunks", &self.chunks.len())
            .field("len", &self.woff)
            .field("read", &self.roff)
            .field("hash", &self.hash.as_ref().map(|h| h.algorithm()))
            .finish()
    }
}
