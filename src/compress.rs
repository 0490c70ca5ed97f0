//! The two interchangeable dictionary coders applied to packed frame
//! bitstreams. Both are greedy longest-match searches over a 64K back
//! window; they differ in token shape. The sliding-window coder packs
//! tokens at the bit level (9-bit literals, 21-bit references), the
//! fixed-token coder always emits 4-byte tokens.
//!
//! Decoders for both live here too; the container reader and the tests
//! use them to reproduce the packed bitstream byte-for-byte.

use crate::error::{CatResult, Error};
use crate::profile::Compression;

const BACK_WINDOW: usize = 65_535;
const FRONT_WINDOW: usize = 15;
const MIN_MATCH: usize = 3;

pub(crate) fn pack(data: &[u8], compression: Compression) -> Vec<u8> {
    match compression {
        Compression::SlidingWindow => pack_sliding(data),
        Compression::FixedToken => pack_fixed(data),
    }
}

pub(crate) fn unpack(data: &[u8], raw_len: usize, compression: Compression) -> CatResult<Vec<u8>> {
    match compression {
        Compression::SlidingWindow => unpack_sliding(data, raw_len),
        Compression::FixedToken => unpack_fixed(data, raw_len),
    }
}

/// MSB-first bit accumulator. Tokens straddle byte boundaries; `finish`
/// pads the last byte with zero bits.
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self { out: Vec::new(), acc: 0, filled: 0 }
    }

    fn put(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 24 && value < 1 << bits);
        self.acc = self.acc << bits | value;
        self.filled += bits;
        while self.filled >= 8 {
            self.filled -= 8;
            self.out.push((self.acc >> self.filled) as u8);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.out.push((self.acc << (8 - self.filled)) as u8);
        }
        self.out
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    filled: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, acc: 0, filled: 0 }
    }

    fn take(&mut self, bits: u32) -> CatResult<u32> {
        while self.filled < bits {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| Error::Parse("compressed stream truncated".into()))?;
            self.pos += 1;
            self.acc = self.acc << 8 | u32::from(byte);
            self.filled += 8;
        }
        self.filled -= bits;
        Ok(self.acc >> self.filled & ((1 << bits) - 1))
    }
}

/// Longest match for `data[i..]` within the back window. Returns
/// (distance, length); `(0, 0)` when nothing matched. On equal lengths the
/// match found latest in the scan wins when `latest_wins` is set.
fn find_match(data: &[u8], i: usize, max_len: usize, latest_wins: bool) -> (usize, usize) {
    let first = data[i];
    let start = i.saturating_sub(BACK_WINDOW);
    let mut best_len = 0;
    let mut best_start = 0;
    for s in start..i {
        if data[s] != first {
            continue;
        }
        let mut len = 1;
        while len < max_len && data[s + len] == data[i + len] {
            len += 1;
        }
        if len > best_len || (latest_wins && len == best_len && best_len > 0) {
            best_len = len;
            best_start = s;
        }
    }
    if best_len == 0 {
        (0, 0)
    } else {
        (i - best_start, best_len)
    }
}

fn pack_sliding(data: &[u8]) -> Vec<u8> {
    let mut bits = BitWriter::new();
    let mut i = 0;
    while i < data.len() {
        let max_len = FRONT_WINDOW.min(data.len() - i);
        let (dist, len) = find_match(data, i, max_len, true);
        if len < MIN_MATCH {
            bits.put(1, 1);
            bits.put(u32::from(data[i]), 8);
            i += 1;
        } else {
            bits.put(0, 1);
            bits.put(dist as u32, 16);
            bits.put(len as u32, 4);
            i += len;
        }
    }
    bits.finish()
}

fn unpack_sliding(data: &[u8], raw_len: usize) -> CatResult<Vec<u8>> {
    let mut bits = BitReader::new(data);
    let mut out = Vec::with_capacity(raw_len);
    while out.len() < raw_len {
        if bits.take(1)? == 1 {
            out.push(bits.take(8)? as u8);
        } else {
            let dist = bits.take(16)? as usize;
            let len = bits.take(4)? as usize;
            if dist == 0 || dist > out.len() || len < MIN_MATCH {
                return Err(Error::Parse("bad back-reference in sliding-window stream".into()));
            }
            let from = out.len() - dist;
            // may overlap the bytes being appended
            for k in 0..len {
                out.push(out[from + k]);
            }
        }
    }
    Ok(out)
}

fn pack_fixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        // always leave one byte for the token's literal
        let max_len = 255.min(data.len() - i - 1);
        let (dist, len) = if max_len > 0 { find_match(data, i, max_len, false) } else { (0, 0) };
        out.extend_from_slice(&(dist as u16).to_le_bytes());
        out.push(len as u8);
        out.push(data[i + len]);
        i += len + 1;
    }
    out
}

fn unpack_fixed(data: &[u8], raw_len: usize) -> CatResult<Vec<u8>> {
    let mut out = Vec::with_capacity(raw_len);
    let mut tokens = data.chunks_exact(4);
    while out.len() < raw_len {
        let t = tokens
            .next()
            .ok_or_else(|| Error::Parse("compressed stream truncated".into()))?;
        let dist = usize::from(u16::from_le_bytes([t[0], t[1]]));
        let len = usize::from(t[2]);
        if len > 0 {
            if dist == 0 || dist > out.len() {
                return Err(Error::Parse("bad back-reference in fixed-token stream".into()));
            }
            let from = out.len() - dist;
            for k in 0..len {
                out.push(out[from + k]);
            }
        }
        out.push(t[3]);
    }
    if out.len() != raw_len {
        return Err(Error::Parse("fixed-token stream overran declared length".into()));
    }
    Ok(out)
}
