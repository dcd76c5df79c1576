//! The wire encoding rules, implemented as methods on [`ChunkedBuffer`].
//!
//! This is the on-disk compatibility surface and must stay bit-exact:
//!
//! ```text
//! i8/u8/bool   1 byte      (bool: 0 = false, anything else = true)
//! i16          2 bytes BE
//! i32 / f32    4 bytes BE  (f32 as IEEE-754 bits, NaN canonicalised)
//! i64 / f64    8 bytes BE  (f64 as IEEE-754 bits, NaN canonicalised)
//! string       [i32 len][UTF-8 bytes]   len -1 = null, 0 = empty
//! byte array   [i32 len][bytes]         len -1 = null, 0 = empty
//! uuid         [i64 msb][i64 lsb]
//! array        [i32 count][element]*    nested prefixes per dimension
//! ```
//!
//! `put_*` appends at the back, `put_*_front` prepends, `get_*` consumes from
//! the front. Text is always UTF-8.

use bytes::Bytes;
use uuid::Uuid;

use crate::buffer::ChunkedBuffer;
use crate::cerealizable::Cerealizable;
use crate::cerealizer::Cerealizer;
use crate::error::{CerealError, Result};
use crate::logging::cereal_log;

/// Length prefix that marks a null string or byte array.
pub const NULL_LENGTH: i32 = -1;

/// Byte written in place of each malformed sequence when encoding raw text.
pub const REPLACEMENT_BYTE: u8 = b'$';

const CANONICAL_NAN_F32: u32 = 0x7fc0_0000;
const CANONICAL_NAN_F64: u64 = 0x7ff8_0000_0000_0000;

/// IEEE bits of `v` with every NaN collapsed onto the canonical quiet NaN.
#[inline]
pub fn f32_to_bits(v: f32) -> u32 {
    if v.is_nan() {
        CANONICAL_NAN_F32
    } else {
        v.to_bits()
    }
}

/// IEEE bits of `v` with every NaN collapsed onto the canonical quiet NaN.
#[inline]
pub fn f64_to_bits(v: f64) -> u64 {
    if v.is_nan() {
        CANONICAL_NAN_F64
    } else {
        v.to_bits()
    }
}

fn length_prefix(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        CerealError::OutOfRange(format!("{len} bytes do not fit an i32 length prefix"))
    })
}

fn count_prefix(count: usize) -> Result<i32> {
    i32::try_from(count).map_err(|_| {
        CerealError::OutOfRange(format!("{count} elements do not fit an i32 count prefix"))
    })
}

/// Replaces each malformed UTF-8 sequence in `raw` by [`REPLACEMENT_BYTE`].
fn encode_lossy(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        out.extend_from_slice(chunk.valid().as_bytes());
        if !chunk.invalid().is_empty() {
            out.push(REPLACEMENT_BYTE);
        }
    }
    out
}

/// Keeps the valid UTF-8 parts of `raw` and drops everything else.
fn decode_dropping_malformed(raw: &[u8]) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut dropped = 0usize;
    for chunk in raw.utf8_chunks() {
        text.push_str(chunk.valid());
        dropped += chunk.invalid().len();
    }
    if dropped > 0 {
        cereal_log!(
            log::Level::Trace,
            "malformed_text",
            "dropped={dropped} kept={}",
            text.len()
        );
    }
    text
}

// --- ENCODING ---

impl ChunkedBuffer {
    /// Appends one unsigned byte.
    pub fn put_u8(&mut self, v: u8) {
        self.append_back(vec![v]);
    }

    /// Appends one signed byte.
    pub fn put_i8(&mut self, v: i8) {
        self.append_back(v.to_be_bytes().to_vec());
    }

    /// Appends a boolean as `1` or `0`.
    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    /// Appends a big-endian `i16`.
    pub fn put_i16(&mut self, v: i16) {
        self.append_back(v.to_be_bytes().to_vec());
    }

    /// Appends a big-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.append_back(v.to_be_bytes().to_vec());
    }

    /// Appends a big-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.append_back(v.to_be_bytes().to_vec());
    }

    /// Appends the canonical IEEE bits of an `f32`.
    pub fn put_f32(&mut self, v: f32) {
        self.append_back(f32_to_bits(v).to_be_bytes().to_vec());
    }

    /// Appends the canonical IEEE bits of an `f64`.
    pub fn put_f64(&mut self, v: f64) {
        self.append_back(f64_to_bits(v).to_be_bytes().to_vec());
    }

    /// Appends a UUID as its two 64-bit halves, most significant first.
    pub fn put_uuid(&mut self, v: &Uuid) {
        let (msb, lsb) = v.as_u64_pair();
        self.append_back(msb.to_be_bytes().to_vec());
        self.append_back(lsb.to_be_bytes().to_vec());
    }

    /// Appends a length-prefixed byte array; `None` is written as length -1.
    ///
    /// # Errors
    /// `OutOfRange` if the array is longer than `i32::MAX`.
    pub fn put_bytes(&mut self, v: Option<&[u8]>) -> Result<()> {
        match v {
            None => self.put_i32(NULL_LENGTH),
            Some(bytes) => {
                self.put_i32(length_prefix(bytes.len())?);
                self.append_back(bytes.to_vec());
            }
        }
        Ok(())
    }

    /// Like [`put_bytes`](Self::put_bytes) but takes ownership, so no copy is made.
    ///
    /// # Errors
    /// `OutOfRange` if the array is longer than `i32::MAX`.
    pub fn put_bytes_owned(&mut self, v: Option<Bytes>) -> Result<()> {
        match v {
            None => self.put_i32(NULL_LENGTH),
            Some(bytes) => {
                self.put_i32(length_prefix(bytes.len())?);
                self.append_back(bytes);
            }
        }
        Ok(())
    }

    /// Appends a length-prefixed UTF-8 string; `None` is written as length -1.
    ///
    /// # Errors
    /// `OutOfRange` if the encoded text is longer than `i32::MAX` bytes.
    pub fn put_str(&mut self, v: Option<&str>) -> Result<()> {
        self.put_bytes(v.map(str::as_bytes))
    }

    /// Appends raw bytes as a string, replacing every malformed UTF-8
    /// sequence with a single `$`.
    ///
    /// # Errors
    /// `OutOfRange` if the result is longer than `i32::MAX` bytes.
    pub fn put_str_lossy(&mut self, raw: Option<&[u8]>) -> Result<()> {
        match raw {
            None => self.put_bytes(None),
            Some(raw) => self.put_bytes_owned(Some(Bytes::from(encode_lossy(raw)))),
        }
    }

    /// Appends a self-describing value. No prefix is written.
    ///
    /// # Errors
    /// Whatever the value's own encoding reports.
    pub fn put<T: Cerealizable>(&mut self, v: &T) -> Result<()> {
        v.cerealize_to(self)
    }

    /// Appends a value through an external codec.
    ///
    /// # Errors
    /// Whatever the cerealizer reports.
    pub fn put_with<T, C: Cerealizer<T> + ?Sized>(&mut self, cerealizer: &C, v: &T) -> Result<()> {
        cerealizer.cerealize_to(self, v)
    }

    /// Appends a count-prefixed array of self-describing values.
    ///
    /// # Errors
    /// `OutOfRange` for more than `i32::MAX` elements, or an element's error.
    pub fn put_array<T: Cerealizable>(&mut self, array: &[T]) -> Result<()> {
        self.put_i32(count_prefix(array.len())?);
        array.iter().try_for_each(|item| item.cerealize_to(self))
    }

    /// Appends a 2-D array: outer count, then each row with its own count.
    /// Rows may differ in length.
    ///
    /// # Errors
    /// See [`put_array`](Self::put_array).
    pub fn put_array_2d<T: Cerealizable>(&mut self, array: &[Vec<T>]) -> Result<()> {
        self.put_i32(count_prefix(array.len())?);
        array.iter().try_for_each(|row| self.put_array(row))
    }

    /// Appends a 3-D array with a count prefix at every dimension.
    ///
    /// # Errors
    /// See [`put_array`](Self::put_array).
    pub fn put_array_3d<T: Cerealizable>(&mut self, array: &[Vec<Vec<T>>]) -> Result<()> {
        self.put_i32(count_prefix(array.len())?);
        array.iter().try_for_each(|plane| self.put_array_2d(plane))
    }

    /// Appends a count-prefixed array through an external codec.
    ///
    /// # Errors
    /// See [`put_array`](Self::put_array).
    pub fn put_array_with<T, C: Cerealizer<T> + ?Sized>(
        &mut self,
        cerealizer: &C,
        array: &[T],
    ) -> Result<()> {
        self.put_i32(count_prefix(array.len())?);
        array
            .iter()
            .try_for_each(|item| cerealizer.cerealize_to(self, item))
    }

    // --- Front insertion ---

    /// Prepends a big-endian `i32`.
    pub fn put_i32_front(&mut self, v: i32) {
        self.append_front(v.to_be_bytes().to_vec());
    }

    /// Prepends a big-endian `i64`.
    pub fn put_i64_front(&mut self, v: i64) {
        self.append_front(v.to_be_bytes().to_vec());
    }

    /// Prepends the canonical IEEE bits of an `f64`.
    pub fn put_f64_front(&mut self, v: f64) {
        self.append_front(f64_to_bits(v).to_be_bytes().to_vec());
    }

    /// Prepends a boolean byte.
    pub fn put_bool_front(&mut self, v: bool) {
        self.append_front(vec![u8::from(v)]);
    }

    /// Prepends a length-prefixed byte array, prefix first in the result.
    ///
    /// # Errors
    /// `OutOfRange` if the array is longer than `i32::MAX`.
    pub fn put_bytes_front(&mut self, v: Option<&[u8]>) -> Result<()> {
        match v {
            None => self.put_i32_front(NULL_LENGTH),
            Some(bytes) => {
                let len = length_prefix(bytes.len())?;
                self.append_front(bytes.to_vec());
                self.put_i32_front(len);
            }
        }
        Ok(())
    }

    /// Prepends a length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// `OutOfRange` if the text is longer than `i32::MAX` bytes.
    pub fn put_str_front(&mut self, v: Option<&str>) -> Result<()> {
        self.put_bytes_front(v.map(str::as_bytes))
    }
}

macro_rules! impl_put_opt {
    ($($name:ident => $put:ident : $t:ty),* $(,)?) => {
        impl ChunkedBuffer {
            $(
                #[doc = concat!("Appends the value with [`", stringify!($put), "`](Self::", stringify!($put), ") only when it is present.")]
                pub fn $name(&mut self, v: Option<$t>) {
                    if let Some(v) = v {
                        self.$put(v);
                    }
                }
            )*
        }
    };
}

impl_put_opt!(
    put_u8_opt => put_u8: u8,
    put_i8_opt => put_i8: i8,
    put_bool_opt => put_bool: bool,
    put_i16_opt => put_i16: i16,
    put_i32_opt => put_i32: i32,
    put_i64_opt => put_i64: i64,
    put_f32_opt => put_f32: f32,
    put_f64_opt => put_f64: f64,
);

// --- DECODING ---

impl ChunkedBuffer {
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.remove_front(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Consumes one unsigned byte.
    ///
    /// # Errors
    /// `OutOfRange` if the buffer is empty. Same for every fixed-width getter.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Consumes one signed byte.
    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.take_array()?))
    }

    /// Consumes a boolean; any non-zero byte is `true`.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Consumes a big-endian `i16`.
    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    /// Consumes a big-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Consumes a big-endian `i64`.
    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Consumes an `f32` from its IEEE bits.
    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take_array()?)))
    }

    /// Consumes an `f64` from its IEEE bits.
    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    /// Consumes a UUID written as two 64-bit halves.
    pub fn get_uuid(&mut self) -> Result<Uuid> {
        let msb = u64::from_be_bytes(self.take_array()?);
        let lsb = u64::from_be_bytes(self.take_array()?);
        Ok(Uuid::from_u64_pair(msb, lsb))
    }

    /// Reads a length prefix. `None` for the null marker.
    fn get_length(&mut self) -> Result<Option<usize>> {
        match self.get_i32()? {
            NULL_LENGTH => Ok(None),
            len if len < NULL_LENGTH => Err(CerealError::OutOfRange(format!(
                "invalid length prefix {len}"
            ))),
            len => {
                let len = len as usize;
                if len > self.len() {
                    return Err(CerealError::truncated(len, self.len()));
                }
                Ok(Some(len))
            }
        }
    }

    /// Consumes a length-prefixed byte array. `None` for the null marker.
    ///
    /// # Errors
    /// `Truncated` if fewer bytes remain than the prefix promised,
    /// `OutOfRange` for a negative prefix other than -1.
    pub fn get_bytes(&mut self) -> Result<Option<Bytes>> {
        match self.get_length()? {
            None => Ok(None),
            Some(len) => self.remove_front(len).map(Some),
        }
    }

    /// Consumes a length-prefixed string. `None` for the null marker.
    ///
    /// Malformed UTF-8 sequences are dropped rather than reported.
    ///
    /// # Errors
    /// Same as [`get_bytes`](Self::get_bytes).
    pub fn get_str(&mut self) -> Result<Option<String>> {
        Ok(self
            .get_bytes()?
            .map(|raw| decode_dropping_malformed(&raw)))
    }

    /// Decodes a self-describing value: blank instance first, then its decode.
    ///
    /// # Errors
    /// `ConstructionFailure` from the factory, or any decode error.
    pub fn get<T: Cerealizable>(&mut self) -> Result<T> {
        T::uncerealize(self)
    }

    /// Decodes a value through an external codec.
    ///
    /// # Errors
    /// Whatever the cerealizer reports.
    pub fn get_with<T, C: Cerealizer<T> + ?Sized>(&mut self, cerealizer: &C) -> Result<T> {
        cerealizer.uncerealize_from(self)
    }

    fn get_count(&mut self) -> Result<usize> {
        let count = self.get_i32()?;
        usize::try_from(count)
            .map_err(|_| CerealError::OutOfRange(format!("negative element count {count}")))
    }

    /// Decodes an array written by [`put_array`](Self::put_array).
    ///
    /// # Errors
    /// `OutOfRange` for a negative count, or any element error.
    pub fn get_array<T: Cerealizable>(&mut self) -> Result<Vec<T>> {
        let count = self.get_count()?;
        // Never trust a count for preallocation beyond what the bytes can hold.
        let mut out = Vec::with_capacity(count.min(self.len()));
        for _ in 0..count {
            out.push(T::uncerealize(self)?);
        }
        Ok(out)
    }

    /// Decodes a 2-D array written by [`put_array_2d`](Self::put_array_2d).
    pub fn get_array_2d<T: Cerealizable>(&mut self) -> Result<Vec<Vec<T>>> {
        let count = self.get_count()?;
        let mut out = Vec::with_capacity(count.min(self.len()));
        for _ in 0..count {
            out.push(self.get_array()?);
        }
        Ok(out)
    }

    /// Decodes a 3-D array written by [`put_array_3d`](Self::put_array_3d).
    pub fn get_array_3d<T: Cerealizable>(&mut self) -> Result<Vec<Vec<Vec<T>>>> {
        let count = self.get_count()?;
        let mut out = Vec::with_capacity(count.min(self.len()));
        for _ in 0..count {
            out.push(self.get_array_2d()?);
        }
        Ok(out)
    }

    /// Decodes an array written by [`put_array_with`](Self::put_array_with).
    pub fn get_array_with<T, C: Cerealizer<T> + ?Sized>(&mut self, cerealizer: &C) -> Result<Vec<T>> {
        let count = self.get_count()?;
        let mut out = Vec::with_capacity(count.min(self.len()));
        for _ in 0..count {
            out.push(cerealizer.uncerealize_from(self)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained(buf: &mut ChunkedBuffer) -> Vec<u8> {
        buf.remove_all().to_vec()
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = ChunkedBuffer::new();
        buf.put_i16(0x0102);
        buf.put_i32(0x0304_0506);
        buf.put_i64(0x0708_090a_0b0c_0d0e);
        assert_eq!(
            drained(&mut buf),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );
    }

    #[test]
    fn test_integer_extremes_round_trip() {
        let mut buf = ChunkedBuffer::new();
        buf.put_i8(i8::MIN);
        buf.put_i16(i16::MIN);
        buf.put_i16(i16::MAX);
        buf.put_i32(i32::MIN);
        buf.put_i32(i32::MAX);
        buf.put_i64(i64::MIN);
        buf.put_i64(i64::MAX);
        assert_eq!(buf.get_i8().unwrap(), i8::MIN);
        assert_eq!(buf.get_i16().unwrap(), i16::MIN);
        assert_eq!(buf.get_i16().unwrap(), i16::MAX);
        assert_eq!(buf.get_i32().unwrap(), i32::MIN);
        assert_eq!(buf.get_i32().unwrap(), i32::MAX);
        assert_eq!(buf.get_i64().unwrap(), i64::MIN);
        assert_eq!(buf.get_i64().unwrap(), i64::MAX);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_nan_payloads_are_canonicalised() {
        let odd_nan = f64::from_bits(0x7ff8_0000_0000_0100);
        let mut buf = ChunkedBuffer::new();
        buf.put_f64(odd_nan);
        buf.put_f64(f64::NAN);
        let a = buf.get_f64().unwrap();
        let b = buf.get_f64().unwrap();
        assert!(a.is_nan());
        assert_eq!(a.to_bits(), b.to_bits());
        assert_eq!(a.to_bits(), CANONICAL_NAN_F64);
    }

    #[test]
    fn test_signed_zero_and_infinity_keep_their_bits() {
        let mut buf = ChunkedBuffer::new();
        for v in [-0.0f64, 0.0, f64::INFINITY, f64::NEG_INFINITY, f64::MIN_POSITIVE] {
            buf.put_f64(v);
            assert_eq!(buf.get_f64().unwrap().to_bits(), v.to_bits());
        }
        for v in [-0.0f32, f32::INFINITY, f32::MAX, f32::MIN] {
            buf.put_f32(v);
            assert_eq!(buf.get_f32().unwrap().to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_bool_decodes_any_nonzero_as_true() {
        let mut buf = ChunkedBuffer::from(vec![0u8, 1, 7]);
        assert!(!buf.get_bool().unwrap());
        assert!(buf.get_bool().unwrap());
        assert!(buf.get_bool().unwrap());
    }

    #[test]
    fn test_string_null_and_empty_markers() {
        let mut buf = ChunkedBuffer::new();
        buf.put_str(None).unwrap();
        buf.put_str(Some("")).unwrap();
        buf.put_str(Some("héllo")).unwrap();
        assert_eq!(
            buf.clone().copy_all()[..8],
            [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]
        );
        assert_eq!(buf.get_str().unwrap(), None);
        assert_eq!(buf.get_str().unwrap(), Some(String::new()));
        assert_eq!(buf.get_str().unwrap().as_deref(), Some("héllo"));
    }

    #[test]
    fn test_lossy_encode_replaces_each_malformed_sequence() {
        let mut buf = ChunkedBuffer::new();
        buf.put_str_lossy(Some(&b"ab\xffcd\xc3"[..])).unwrap();
        assert_eq!(buf.get_str().unwrap().as_deref(), Some("ab$cd$"));
    }

    #[test]
    fn test_decode_drops_malformed_bytes() {
        let mut buf = ChunkedBuffer::new();
        buf.put_bytes(Some(&b"ok\xfe\xffgo"[..])).unwrap();
        assert_eq!(buf.get_str().unwrap().as_deref(), Some("okgo"));
    }

    #[test]
    fn test_short_payload_is_truncated() {
        let mut buf = ChunkedBuffer::new();
        buf.put_i32(10);
        buf.append_back(vec![1u8, 2, 3]);
        let err = buf.get_bytes().unwrap_err();
        assert!(matches!(
            err,
            CerealError::Truncated {
                expected: 10,
                available: 3
            }
        ));
    }

    #[test]
    fn test_bad_negative_length_is_out_of_range() {
        let mut buf = ChunkedBuffer::new();
        buf.put_i32(-5);
        assert!(matches!(buf.get_bytes(), Err(CerealError::OutOfRange(_))));
    }

    #[test]
    fn test_uuid_layout() {
        let id = Uuid::from_u64_pair(0x0102_0304_0506_0708, 0x090a_0b0c_0d0e_0f10);
        let mut buf = ChunkedBuffer::new();
        buf.put_uuid(&id);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.clone().copy_all(), id.as_bytes().to_vec());
        assert_eq!(buf.get_uuid().unwrap(), id);
    }

    #[test]
    fn test_front_insertion_reads_first() {
        let mut buf = ChunkedBuffer::new();
        buf.put_i32(2);
        buf.put_str_front(Some("head")).unwrap();
        buf.put_i64_front(-1);
        assert_eq!(buf.get_i64().unwrap(), -1);
        assert_eq!(buf.get_str().unwrap().as_deref(), Some("head"));
        assert_eq!(buf.get_i32().unwrap(), 2);
    }

    #[test]
    fn test_optional_puts_skip_absent_values() {
        let mut buf = ChunkedBuffer::new();
        buf.put_f32_opt(None);
        buf.put_i16_opt(Some(5));
        assert_eq!(buf.len(), 2);
    }
}
