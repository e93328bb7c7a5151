//! Fixed-length bit array with Redis string bit ordering.
//!
//! Bit `i` lives in byte `i / 8` at position `7 - i % 8` (most significant bit
//! first), the same layout `SETBIT`/`GETBIT` use, so the raw bytes of either
//! backend encode identically in snapshots.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// A bit array addressed by cell index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    bytes: Vec<u8>,
    len: u64,
}

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub fn byte_len(bits: u64) -> usize {
    bits.div_ceil(8) as usize
}

impl Bitset {
    /// Create an all-zero bitset of `len` bits.
    pub fn new(len: u64) -> Self {
        Self {
            bytes: vec![0; byte_len(len)],
            len,
        }
    }

    /// Wrap raw bytes read from a store.
    ///
    /// Short buffers are zero-extended (Redis returns only the bytes written so
    /// far); long buffers are truncated.
    pub fn from_bytes(mut bytes: Vec<u8>, len: u64) -> Self {
        bytes.resize(byte_len(len), 0);
        Self { bytes, len }
    }

    /// Number of addressable bits.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the bitset holds no bits.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read bit `index`. Out-of-range indices read as unset.
    #[inline]
    pub fn get(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let byte = self.bytes[(index / 8) as usize];
        byte & mask(index) != 0
    }

    /// Write bit `index`, returning the previous value.
    ///
    /// Out-of-range writes are ignored and report `false`.
    #[inline]
    pub fn set(&mut self, index: u64, value: bool) -> bool {
        if index >= self.len {
            return false;
        }
        let byte = &mut self.bytes[(index / 8) as usize];
        let previous = *byte & mask(index) != 0;
        if value {
            *byte |= mask(index);
        } else {
            *byte &= !mask(index);
        }
        previous
    }

    /// Population count.
    pub fn count_ones(&self) -> u64 {
        self.bytes.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    /// Raw bytes in store layout.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 (standard alphabet, no padding) encoding used on the wire.
    pub fn to_base64(&self) -> String {
        encode_bits(&self.bytes)
    }
}

/// Encode raw bitset bytes for a snapshot payload.
pub fn encode_bits(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

#[inline]
fn mask(index: u64) -> u8 {
    0x80 >> (index % 8)
}
