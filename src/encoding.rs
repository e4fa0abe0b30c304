//! Streaming point-wise compression for chunk contents: delta-of-delta timestamps and
//! Gorilla-style XOR floats, interleaved in one append-only bit stream.
//!
//! A [`Series`] accepts pushes until it is finished. Iterators snapshot the bits written so
//! far and own their data, so they can be drained after the owning store's lock is released.

use crate::error::StoreError;
use crate::types::{Timestamp, Value};

use std::sync::Arc;

// Timestamp delta-of-delta buckets: (prefix, prefix_len, payload_bits, bias).
const DOD_BUCKETS: [(u64, u8, u8, i64); 3] = [
    (0b10, 2, 7, 63),
    (0b110, 3, 9, 255),
    (0b1110, 4, 12, 2047),
];
const DOD_WIDE_PREFIX: u64 = 0b1111;
const FIRST_DELTA_BITS: u8 = 32;

/// Append-only, time-ordered compressed sequence of `(timestamp, value)` pairs.
#[derive(Debug, Clone)]
pub struct Series {
    start: Timestamp,
    bits: BitWriter,
    /// Present once the series is finished; readers share it without copying.
    sealed: Option<Arc<[u8]>>,
    count: u32,
    last_ts: Timestamp,
    last_delta: i64,
    last_value: u64,
    prev_leading: u8,
    prev_trailing: u8,
    prev_sigbits: u8,
}

impl Series {
    /// Creates an empty, open series anchored at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            bits: BitWriter::default(),
            sealed: None,
            count: 0,
            last_ts: start,
            last_delta: 0,
            last_value: 0,
            prev_leading: 0,
            prev_trailing: 0,
            prev_sigbits: 0,
        }
    }

    /// Appends a point. Timestamps must be non-decreasing and not lower than `start`.
    pub fn push(&mut self, ts: Timestamp, value: Value) -> Result<(), StoreError> {
        if self.sealed.is_some() {
            return Err(StoreError::SeriesFinished { start: self.start });
        }
        if ts < self.last_ts {
            return Err(StoreError::OutOfOrder {
                ts,
                last_ts: self.last_ts,
            });
        }

        if self.count == 0 {
            let delta = ts - self.start;
            self.bits.push_bits(delta as u64, FIRST_DELTA_BITS);
            self.bits.push_bits(value.to_bits(), 64);
            self.last_delta = delta as i64;
        } else {
            let delta = (ts - self.last_ts) as i64;
            self.write_dod(delta - self.last_delta);
            self.write_value(value.to_bits());
            self.last_delta = delta;
        }

        self.last_ts = ts;
        self.last_value = value.to_bits();
        self.count += 1;
        Ok(())
    }

    fn write_dod(&mut self, dod: i64) {
        if dod == 0 {
            self.bits.push_bit(false);
            return;
        }
        for &(prefix, prefix_len, payload, bias) in &DOD_BUCKETS {
            let lo = -bias;
            let hi = bias + 1;
            if (lo..=hi).contains(&dod) {
                self.bits.push_bits(prefix, prefix_len);
                self.bits.push_bits((dod + bias) as u64, payload);
                return;
            }
        }
        self.bits.push_bits(DOD_WIDE_PREFIX, 4);
        self.bits.push_bits(dod as u64, 64);
    }

    fn write_value(&mut self, cur: u64) {
        let x = self.last_value ^ cur;
        if x == 0 {
            self.bits.push_bit(false);
            return;
        }
        self.bits.push_bit(true);
        let leading = x.leading_zeros() as u8;
        let trailing = x.trailing_zeros() as u8;
        let sigbits = 64 - leading - trailing;

        if self.prev_sigbits != 0 && leading >= self.prev_leading && trailing >= self.prev_trailing {
            self.bits.push_bit(false);
            self.bits.push_bits(x >> self.prev_trailing, self.prev_sigbits);
        } else {
            self.bits.push_bit(true);
            self.bits.push_bits(leading as u64, 6);
            self.bits.push_bits((sigbits - 1) as u64, 6);
            self.bits.push_bits(x >> trailing, sigbits);
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            self.prev_sigbits = sigbits;
        }
    }

    /// Seals the series. Further pushes fail; repeated calls are no-ops.
    pub fn finish(&mut self) {
        if self.sealed.is_none() {
            let bytes = std::mem::take(&mut self.bits).into_bytes();
            self.sealed = Some(Arc::from(bytes));
        }
    }

    /// Returns a one-shot forward iterator over the points pushed so far.
    pub fn iter(&self) -> SeriesIter {
        let data = match &self.sealed {
            Some(bytes) => Arc::clone(bytes),
            None => Arc::from(self.bits.snapshot()),
        };
        SeriesIter::new(self.start, data, self.count)
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_finished(&self) -> bool {
        self.sealed.is_some()
    }

    /// Number of bytes the encoded stream currently occupies.
    pub fn encoded_len(&self) -> usize {
        match &self.sealed {
            Some(bytes) => bytes.len(),
            None => self.bits.byte_len(),
        }
    }
}

/// Forward, time-ordered iterator over a [`Series`] snapshot.
///
/// Owns its bytes; holds no reference into the series it came from.
#[derive(Debug, Clone)]
pub struct SeriesIter {
    start: Timestamp,
    reader: BitReader,
    remaining: u32,
    read: u32,
    prev_ts: i64,
    prev_delta: i64,
    prev_value: u64,
    prev_leading: u8,
    prev_trailing: u8,
    prev_sigbits: u8,
}

impl SeriesIter {
    fn new(start: Timestamp, data: Arc<[u8]>, count: u32) -> Self {
        Self {
            start,
            reader: BitReader::new(data),
            remaining: count,
            read: 0,
            prev_ts: start as i64,
            prev_delta: 0,
            prev_value: 0,
            prev_leading: 0,
            prev_trailing: 0,
            prev_sigbits: 0,
        }
    }

    /// Aligned start of the series this iterator was taken from.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    fn decode_first(&mut self) -> Option<(Timestamp, Value)> {
        let delta = self.reader.read_bits(FIRST_DELTA_BITS)? as i64;
        let value = self.reader.read_bits(64)?;
        self.prev_delta = delta;
        self.prev_ts = self.start as i64 + delta;
        self.prev_value = value;
        Some((self.prev_ts as Timestamp, f64::from_bits(value)))
    }

    fn decode_next(&mut self) -> Option<(Timestamp, Value)> {
        let dod = self.read_dod()?;
        let delta = self.prev_delta + dod;
        let ts = self.prev_ts + delta;
        let value = self.read_value()?;
        self.prev_delta = delta;
        self.prev_ts = ts;
        self.prev_value = value;
        Some((ts as Timestamp, f64::from_bits(value)))
    }

    fn read_dod(&mut self) -> Option<i64> {
        if !self.reader.read_bit()? {
            return Some(0);
        }
        for &(_, _, payload, bias) in &DOD_BUCKETS {
            if !self.reader.read_bit()? {
                return Some(self.reader.read_bits(payload)? as i64 - bias);
            }
        }
        Some(self.reader.read_bits(64)? as i64)
    }

    fn read_value(&mut self) -> Option<u64> {
        if !self.reader.read_bit()? {
            return Some(self.prev_value);
        }
        let (sigbits, trailing) = if !self.reader.read_bit()? {
            (self.prev_sigbits, self.prev_trailing)
        } else {
            let leading = self.reader.read_bits(6)? as u8;
            let sigbits = self.reader.read_bits(6)? as u8 + 1;
            let trailing = 64u8.checked_sub(leading)?.checked_sub(sigbits)?;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            self.prev_sigbits = sigbits;
            (sigbits, trailing)
        };
        let significant = self.reader.read_bits(sigbits)?;
        Some(self.prev_value ^ (significant << trailing))
    }
}

impl Iterator for SeriesIter {
    type Item = (Timestamp, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let point = if self.read == 0 {
            self.decode_first()
        } else {
            self.decode_next()
        };
        match point {
            Some(p) => {
                self.remaining -= 1;
                self.read += 1;
                Some(p)
            }
            None => {
                // Truncated stream; stop rather than yield garbage.
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

// --- Bit helpers ---

#[derive(Debug, Clone, Default)]
struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    used: u8,
}

impl BitWriter {
    fn push_bit(&mut self, bit: bool) {
        let b = if bit { 1u8 } else { 0u8 };
        self.cur |= b << (7 - self.used);
        self.used += 1;
        if self.used == 8 {
            self.out.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    fn push_bits(&mut self, mut v: u64, count: u8) {
        if count == 0 {
            return;
        }
        if count < 64 {
            v &= (1u64 << count) - 1;
        }
        for i in (0..count).rev() {
            self.push_bit(((v >> i) & 1) == 1);
        }
    }

    fn byte_len(&self) -> usize {
        self.out.len() + usize::from(self.used > 0)
    }

    /// Copy of the stream including the partially filled trailing byte.
    fn snapshot(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        bytes.extend_from_slice(&self.out);
        if self.used > 0 {
            bytes.push(self.cur);
        }
        bytes
    }

    fn into_bytes(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.out.push(self.cur);
        }
        self.out
    }
}

#[derive(Debug, Clone)]
struct BitReader {
    data: Arc<[u8]>,
    pos: usize,
}

impl BitReader {
    fn new(data: Arc<[u8]>) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Some(bit)
    }

    fn read_bits(&mut self, count: u8) -> Option<u64> {
        let mut out = 0u64;
        for _ in 0..count {
            out <<= 1;
            out |= if self.read_bit()? { 1 } else { 0 };
        }
        Some(out)
    }
}
