//! Bit-addressed views over the game's flag words.
//!
//! The game packs flags into little-endian 32-bit words with bit 0 being the
//! *most* significant bit of the first word. Every type in this module uses
//! that numbering, so bit `n` here is bit `n` in the game's own tables.

use crate::error::{Error, Result};

/// Returns the byte offset and byte mask that hold `bit`.
pub const fn bit_location(bit: u32) -> (usize, u8) {
    let word = (bit / 32) as usize;
    let in_word = bit % 32;
    let byte = word * 4 + 3 - (in_word / 8) as usize;
    (byte, 0x80 >> (in_word % 8))
}

/// Returns the bit number stored under `mask` of byte `byte`. This is the
/// inverse of [bit_location].
const fn bit_at(byte: usize, bit_in_byte: u32) -> u32 {
    let word = (byte / 4) as u32;
    let byte_in_word = (byte % 4) as u32;
    word * 32 + (3 - byte_in_word) * 8 + bit_in_byte
}

/// A single bit that differs between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitChange {
    pub bit: u32,
    pub old: bool,
    pub new: bool,
}

/// A read-only window over a byte buffer.
#[derive(Debug, Clone, Copy)]
pub struct BitfieldView<'a> {
    bytes: &'a [u8],
}

impl<'a> BitfieldView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// The number of bytes this view covers.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns whether `bit` is set, or an error if the byte holding `bit`
    /// lies outside the view.
    pub fn get(&self, bit: u32) -> Result<bool> {
        let (byte, mask) = bit_location(bit);
        match self.bytes.get(byte) {
            Some(value) => Ok(value & mask != 0),
            None => Err(Error::BitOutOfRange {
                bit,
                len: self.bytes.len(),
            }),
        }
    }

    /// Returns whether any bit in the view is set.
    pub fn any_set(&self) -> bool {
        self.bytes.iter().any(|b| *b != 0)
    }

    /// Returns every set bit in ascending order.
    pub fn set_indices(&self) -> Vec<u32> {
        let mut bits = self
            .bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b != 0)
            .flat_map(|(i, b)| {
                (0..8u32)
                    .filter(move |k| b & (0x80 >> k) != 0)
                    .map(move |k| bit_at(i, k))
            })
            .collect::<Vec<_>>();
        bits.sort_unstable();
        bits
    }

    /// Compares this view (the old state) against `new` and returns every bit
    /// that differs, in ascending bit order. Only the overlapping prefix of the
    /// two buffers is compared.
    pub fn changed_bits(&self, new: BitfieldView<'_>) -> Vec<BitChange> {
        let mut changes = Vec::new();
        for (i, (old, new)) in self.bytes.iter().zip(new.bytes).enumerate() {
            let diff = old ^ new;
            if diff == 0 {
                continue;
            }
            for k in 0..8u32 {
                let mask = 0x80 >> k;
                if diff & mask != 0 {
                    changes.push(BitChange {
                        bit: bit_at(i, k),
                        old: old & mask != 0,
                        new: new & mask != 0,
                    });
                }
            }
        }
        changes.sort_unstable_by_key(|c| c.bit);
        changes
    }
}

/// An owned, mutable bitfield.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitfieldBuf {
    bytes: Vec<u8>,
}

impl BitfieldBuf {
    /// Creates a zeroed bitfield of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn view(&self) -> BitfieldView<'_> {
        BitfieldView::new(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, bit: u32) -> Result<bool> {
        self.view().get(bit)
    }

    /// Sets `bit` to `value`.
    pub fn assign(&mut self, bit: u32, value: bool) -> Result<()> {
        let (byte, mask) = bit_location(bit);
        let len = self.bytes.len();
        let Some(slot) = self.bytes.get_mut(byte) else {
            return Err(Error::BitOutOfRange { bit, len });
        };
        if value {
            *slot |= mask;
        } else {
            *slot &= !mask;
        }
        Ok(())
    }

    pub fn set(&mut self, bit: u32) -> Result<()> {
        self.assign(bit, true)
    }

    pub fn clear(&mut self, bit: u32) -> Result<()> {
        self.assign(bit, false)
    }

    /// Zeroes every bit.
    pub fn clear_all(&mut self) {
        self.bytes.fill(0);
    }

    /// Returns the bitwise XOR of `self` and `other`, truncated to the shorter
    /// of the two.
    pub fn xor(&self, other: &BitfieldBuf) -> BitfieldBuf {
        BitfieldBuf {
            bytes: self
                .bytes
                .iter()
                .zip(&other.bytes)
                .map(|(a, b)| a ^ b)
                .collect(),
        }
    }

    pub fn any_set(&self) -> bool {
        self.view().any_set()
    }

    pub fn set_indices(&self) -> Vec<u32> {
        self.view().set_indices()
    }
}

impl From<&[u8]> for BitfieldBuf {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}
