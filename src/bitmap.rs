//! Fixed-size bit vectors.
//!
//! [`NullBitMap`] is the presence header of a composite record: one bit per
//! optional field, set when the field is absent.

use crate::buffer::ChunkedBuffer;
use crate::cerealizable::Cerealizable;
use crate::error::{CerealError, Result};

/// A fixed-size bit vector packed 8 bits per byte, least significant bit first.
///
/// Wire form: `i32` size in bits, then the packed bytes as a byte array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitMap {
    map: Vec<u8>,
    size: usize,
}

impl BitMap {
    /// Creates a map of `size` bits, all clear.
    pub fn new(size: usize) -> Self {
        Self {
            map: vec![0u8; size.div_ceil(8)],
            size,
        }
    }

    /// Wraps already packed bits.
    ///
    /// # Errors
    /// `OutOfRange` if `map` holds fewer than `size` bits.
    pub fn from_bytes(map: Vec<u8>, size: usize) -> Result<Self> {
        if map.len() * 8 < size {
            return Err(CerealError::OutOfRange(format!(
                "{} bytes cannot hold {size} bits",
                map.len()
            )));
        }
        Ok(Self { map, size })
    }

    /// Number of addressable bits.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The packed bits.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    fn locate(&self, index: usize) -> Result<(usize, u8)> {
        if index >= self.size {
            return Err(CerealError::OutOfRange(format!(
                "bit {index} is outside a map of {} bits",
                self.size
            )));
        }
        Ok((index / 8, 1u8 << (index % 8)))
    }

    /// Reads bit `index`.
    ///
    /// # Errors
    /// `OutOfRange` if `index >= size()`.
    pub fn get(&self, index: usize) -> Result<bool> {
        let (byte, mask) = self.locate(index)?;
        Ok(self.map[byte] & mask != 0)
    }

    /// Writes bit `index`.
    ///
    /// # Errors
    /// `OutOfRange` if `index >= size()`.
    pub fn set(&mut self, index: usize, value: bool) -> Result<()> {
        let (byte, mask) = self.locate(index)?;
        if value {
            self.map[byte] |= mask;
        } else {
            self.map[byte] &= !mask;
        }
        Ok(())
    }

    /// Clears bit `index`.
    ///
    /// # Errors
    /// `OutOfRange` if `index >= size()`.
    pub fn clear(&mut self, index: usize) -> Result<()> {
        self.set(index, false)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.map.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl Cerealizable for BitMap {
    fn blank() -> Result<Self> {
        Ok(Self::default())
    }

    fn cerealize_to(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        let size = i32::try_from(self.size).map_err(|_| {
            CerealError::OutOfRange(format!("{} bits do not fit an i32 size", self.size))
        })?;
        buf.put_i32(size);
        buf.put_bytes(Some(self.map.as_slice()))
    }

    fn uncerealize_from(&mut self, buf: &mut ChunkedBuffer) -> Result<()> {
        let size = buf.get_i32()?;
        let size = usize::try_from(size)
            .map_err(|_| CerealError::OutOfRange(format!("negative bitmap size {size}")))?;
        let map = buf
            .get_bytes()?
            .ok_or_else(|| CerealError::OutOfRange("bitmap without bytes".into()))?;
        *self = Self::from_bytes(map.to_vec(), size)?;
        Ok(())
    }
}

/// Presence header for optional fields; a set bit means the field is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullBitMap {
    bits: BitMap,
}

impl NullBitMap {
    /// Creates a header for `fields` optional fields, all marked present.
    pub fn new(fields: usize) -> Self {
        Self {
            bits: BitMap::new(fields),
        }
    }

    /// Number of fields tracked.
    pub fn size(&self) -> usize {
        self.bits.size()
    }

    /// Whether field `index` is absent. Indexes past the end count as absent.
    pub fn is_null(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(true)
    }

    /// Marks field `index` absent or present.
    ///
    /// # Errors
    /// `OutOfRange` if `index >= size()`.
    pub fn set_null(&mut self, index: usize, null: bool) -> Result<()> {
        self.bits.set(index, null)
    }

    /// The underlying bits.
    pub fn bits(&self) -> &BitMap {
        &self.bits
    }
}

impl Cerealizable for NullBitMap {
    fn blank() -> Result<Self> {
        Ok(Self::default())
    }

    fn cerealize_to(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        self.bits.cerealize_to(buf)
    }

    fn uncerealize_from(&mut self, buf: &mut ChunkedBuffer) -> Result<()> {
        self.bits.uncerealize_from(buf)
    }
}
