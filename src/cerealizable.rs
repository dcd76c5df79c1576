//! The self-describing capability.
//!
//! A [`Cerealizable`] type knows how to write itself into a [`ChunkedBuffer`]
//! and how to fill a blank instance of itself from one. Decoding is always
//! two steps: [`Cerealizable::blank`] builds the instance, then
//! [`Cerealizable::uncerealize_from`] populates it. Readers, the sorter and
//! the pipelines only rely on this pair.
//!
//! [`CerealField`] is the per-field contract used by `#[derive(Cerealizable)]`.
//! It covers primitives, strings, byte arrays, UUIDs, nested records and
//! `Vec`s of any of those.

use bytes::Bytes;
use uuid::Uuid;

use crate::bitmap::{BitMap, NullBitMap};
use crate::buffer::ChunkedBuffer;
use crate::error::{CerealError, Result};

/// A value that encodes and decodes itself.
pub trait Cerealizable: Sized {
    /// Zero-argument factory producing the instance decoding starts from.
    ///
    /// # Errors
    /// `ConstructionFailure` if no blank instance can be built.
    fn blank() -> Result<Self>;

    /// Appends the encoding of `self` to `buf`.
    ///
    /// # Errors
    /// `OutOfRange` if a variable-length part exceeds the wire limits.
    fn cerealize_to(&self, buf: &mut ChunkedBuffer) -> Result<()>;

    /// Overwrites `self` with the next value decoded from the front of `buf`.
    ///
    /// # Errors
    /// Any buffer or codec error raised while decoding.
    fn uncerealize_from(&mut self, buf: &mut ChunkedBuffer) -> Result<()>;

    /// Factory followed by decode.
    fn uncerealize(buf: &mut ChunkedBuffer) -> Result<Self> {
        let mut value = Self::blank()?;
        value.uncerealize_from(buf)?;
        Ok(value)
    }

    /// Encodes `self` into a new buffer.
    fn to_buffer(&self) -> Result<ChunkedBuffer> {
        let mut buf = ChunkedBuffer::new();
        self.cerealize_to(&mut buf)?;
        Ok(buf)
    }
}

/// A field type usable inside a derived record.
pub trait CerealField: Sized {
    /// Value a blank record starts with.
    fn blank_field() -> Result<Self>;

    /// Appends the field.
    fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()>;

    /// Consumes the field.
    fn get_field(buf: &mut ChunkedBuffer) -> Result<Self>;
}

macro_rules! impl_fixed_field {
    ($($t:ty => $put:ident, $get:ident);* $(;)?) => {
        $(
            impl CerealField for $t {
                fn blank_field() -> Result<Self> {
                    Ok(<$t>::default())
                }

                fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()> {
                    buf.$put(*self);
                    Ok(())
                }

                fn get_field(buf: &mut ChunkedBuffer) -> Result<Self> {
                    buf.$get()
                }
            }
        )*
    };
}

impl_fixed_field! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    bool => put_bool, get_bool;
    i16 => put_i16, get_i16;
    i32 => put_i32, get_i32;
    i64 => put_i64, get_i64;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
}

impl CerealField for String {
    fn blank_field() -> Result<Self> {
        Ok(String::new())
    }

    fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        buf.put_str(Some(self.as_str()))
    }

    fn get_field(buf: &mut ChunkedBuffer) -> Result<Self> {
        buf.get_str()?
            .ok_or_else(|| CerealError::OutOfRange("null string in a required field".into()))
    }
}

impl CerealField for Bytes {
    fn blank_field() -> Result<Self> {
        Ok(Bytes::new())
    }

    fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        buf.put_bytes_owned(Some(self.clone()))
    }

    fn get_field(buf: &mut ChunkedBuffer) -> Result<Self> {
        buf.get_bytes()?
            .ok_or_else(|| CerealError::OutOfRange("null byte array in a required field".into()))
    }
}

impl CerealField for Uuid {
    fn blank_field() -> Result<Self> {
        Ok(Uuid::nil())
    }

    fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        buf.put_uuid(self);
        Ok(())
    }

    fn get_field(buf: &mut ChunkedBuffer) -> Result<Self> {
        buf.get_uuid()
    }
}

/// Count-prefixed, one prefix per nesting level.
impl<T: CerealField> CerealField for Vec<T> {
    fn blank_field() -> Result<Self> {
        Ok(Vec::new())
    }

    fn put_field(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        let count = i32::try_from(self.len()).map_err(|_| {
            CerealError::OutOfRange(format!("{} elements do not fit an i32 count", self.len()))
        })?;
        buf.put_i32(count);
        self.iter().try_for_each(|item| item.put_field(buf))
    }

    fn get_field(buf: &mut ChunkedBuffer) -> Result<Self> {
        let count = buf.get_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| CerealError::OutOfRange(format!("negative element count {count}")))?;
        let mut out = Vec::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            out.push(T::get_field(buf)?);
        }
        Ok(out)
    }
}

/// Implements [`CerealField`] for types with a hand-written [`Cerealizable`]
/// impl so they can be nested inside derived records.
///
/// Derived types get this for free.
#[macro_export]
macro_rules! cereal_field {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::CerealField for $t {
                fn blank_field() -> $crate::Result<Self> {
                    <$t as $crate::Cerealizable>::blank()
                }

                fn put_field(&self, buf: &mut $crate::ChunkedBuffer) -> $crate::Result<()> {
                    $crate::Cerealizable::cerealize_to(self, buf)
                }

                fn get_field(buf: &mut $crate::ChunkedBuffer) -> $crate::Result<Self> {
                    <$t as $crate::Cerealizable>::uncerealize(buf)
                }
            }
        )+
    };
}

cereal_field!(BitMap, NullBitMap, ChunkedBuffer);

/// A buffer nested in a record travels as a byte array.
impl Cerealizable for ChunkedBuffer {
    fn blank() -> Result<Self> {
        Ok(ChunkedBuffer::new())
    }

    fn cerealize_to(&self, buf: &mut ChunkedBuffer) -> Result<()> {
        let mut copy = self.clone();
        buf.put_bytes_owned(Some(copy.remove_all()))
    }

    fn uncerealize_from(&mut self, buf: &mut ChunkedBuffer) -> Result<()> {
        match buf.get_bytes()? {
            Some(bytes) => self.reset_to(bytes),
            None => self.reset(),
        }
        Ok(())
    }
}
