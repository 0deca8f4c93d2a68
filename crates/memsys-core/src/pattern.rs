//! Deterministic byte streams for workload generation.
//!
//! `SeededBytes` yields the same bytes for the same seed no matter how the
//! reader's buffer sizes vary, which lets two independent consumers observe
//! an identical logical stream.

use std::io::{self, Read};

/// SplitMix64 step.
fn next_word(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Reproducible size in `[min, max)` derived from `seed`.
pub fn seeded_size(seed: u64, min: u64, max: u64) -> u64 {
    if max <= min {
        return min;
    }
    let mut state = seed;
    min + next_word(&mut state) % (max - min)
}

/// Finite pseudo-random byte stream.
#[derive(Debug, Clone)]
pub struct SeededBytes {
    state: u64,
    word: [u8; 8],
    word_pos: usize,
    remaining: u64,
}

impl SeededBytes {
    pub fn new(seed: u64, len: u64) -> Self {
        Self {
            state: seed,
            word: [0; 8],
            word_pos: 8,
            remaining: len,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Fill `out` completely, ignoring the length limit.
    pub fn fill(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            if self.word_pos == 8 {
                self.word = next_word(&mut self.state).to_le_bytes();
                self.word_pos = 0;
            }
            *byte = self.word[self.word_pos];
            self.word_pos += 1;
        }
    }
}

impl Read for SeededBytes {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining) as usize;
        self.fill(&mut buf[..n]);
        self.remaining -= n as u64;
        Ok(n)
    }
}
