//! External codecs for types that cannot (or should not) encode themselves.
//!
//! A [`Cerealizer<T>`] plays the role of [`Cerealizable`] for a `T` owned by
//! someone else. Cerealizers are `Send + Sync` so a single instance can be
//! shared with pipeline worker threads.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use uuid::Uuid;

use crate::bitmap::BitMap;
use crate::buffer::ChunkedBuffer;
use crate::cerealizable::Cerealizable;
use crate::error::{CerealError, Result};

/// Encodes and decodes values of `T` on their behalf.
pub trait Cerealizer<T>: Send + Sync {
    /// Appends the encoding of `value`.
    ///
    /// # Errors
    /// `OutOfRange` if a variable-length part exceeds the wire limits.
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &T) -> Result<()>;

    /// Decodes the next value from the front of `buf`.
    ///
    /// # Errors
    /// Any buffer or codec error raised while decoding.
    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<T>;
}

/// Bridges a [`Cerealizable`] type to the [`Cerealizer`] interface.
pub struct CerealizableCerealizer<T>(PhantomData<fn() -> T>);

impl<T> CerealizableCerealizer<T> {
    /// Creates the bridge.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for CerealizableCerealizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CerealizableCerealizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CerealizableCerealizer")
    }
}

impl<T: Cerealizable> Cerealizer<T> for CerealizableCerealizer<T> {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &T) -> Result<()> {
        value.cerealize_to(buf)
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<T> {
        T::uncerealize(buf)
    }
}

/// Nullable UTF-8 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCerealizer;

impl Cerealizer<Option<String>> for StringCerealizer {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &Option<String>) -> Result<()> {
        buf.put_str(value.as_deref())
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<Option<String>> {
        buf.get_str()
    }
}

/// UUIDs as two 64-bit halves.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidCerealizer;

impl Cerealizer<Uuid> for UuidCerealizer {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &Uuid) -> Result<()> {
        buf.put_uuid(value);
        Ok(())
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<Uuid> {
        buf.get_uuid()
    }
}

/// [`BitMap`]s through the external interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitMapCerealizer;

impl Cerealizer<BitMap> for BitMapCerealizer {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &BitMap) -> Result<()> {
        value.cerealize_to(buf)
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<BitMap> {
        BitMap::uncerealize(buf)
    }
}

/// A language tag such as `en`, `en-US` or `pt-BR`.
///
/// Only the language and an optional region are kept. Parsing accepts `-`
/// and `_` as separators and normalises case: lowercase language, uppercase
/// region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    /// Builds a locale from its parts.
    ///
    /// # Errors
    /// `OutOfRange` if the language is empty or either part is not ASCII
    /// alphanumeric.
    pub fn new(language: &str, region: Option<&str>) -> Result<Self> {
        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(language) || region.is_some_and(|r| !valid(r)) {
            return Err(CerealError::OutOfRange(format!(
                "invalid locale parts {language:?} / {region:?}"
            )));
        }
        Ok(Self {
            language: language.to_ascii_lowercase(),
            region: region.map(str::to_ascii_uppercase),
        })
    }

    /// Lowercase language subtag.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Uppercase region subtag, if any.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl FromStr for Locale {
    type Err = CerealError;

    fn from_str(tag: &str) -> Result<Self> {
        let mut parts = tag.split(['-', '_']);
        let language = parts.next().unwrap_or_default();
        let region = parts.next();
        if parts.next().is_some() {
            return Err(CerealError::OutOfRange(format!(
                "unsupported locale tag {tag:?}"
            )));
        }
        Self::new(language, region)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}-{region}", self.language),
            None => f.write_str(&self.language),
        }
    }
}

/// Nullable [`Locale`]s as their language tag string.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocaleCerealizer;

impl Cerealizer<Option<Locale>> for LocaleCerealizer {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &Option<Locale>) -> Result<()> {
        let tag = value.as_ref().map(Locale::to_string);
        buf.put_str(tag.as_deref())
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<Option<Locale>> {
        buf.get_str()?.map(|tag| tag.parse()).transpose()
    }
}

/// Count-prefixed lists whose elements go through another cerealizer.
///
/// A null list is written with count -1.
#[derive(Debug, Default, Clone)]
pub struct ListCerealizer<C> {
    element: C,
}

impl<C> ListCerealizer<C> {
    /// Wraps the element cerealizer.
    pub fn new(element: C) -> Self {
        Self { element }
    }
}

impl<T, C: Cerealizer<T>> Cerealizer<Option<Vec<T>>> for ListCerealizer<C> {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &Option<Vec<T>>) -> Result<()> {
        match value {
            None => {
                buf.put_i32(crate::wire::NULL_LENGTH);
                Ok(())
            }
            Some(items) => buf.put_array_with(&self.element, items),
        }
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> Result<Option<Vec<T>>> {
        let count = buf.get_i32()?;
        if count == crate::wire::NULL_LENGTH {
            return Ok(None);
        }
        let count = usize::try_from(count)
            .map_err(|_| CerealError::OutOfRange(format!("invalid list size {count}")))?;
        let mut items = Vec::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            items.push(self.element.uncerealize_from(buf)?);
        }
        Ok(Some(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parsing_normalises_case() {
        let locale: Locale = "pt_br".parse().unwrap();
        assert_eq!(locale.language(), "pt");
        assert_eq!(locale.region(), Some("BR"));
        assert_eq!(locale.to_string(), "pt-BR");
        assert!("".parse::<Locale>().is_err());
        assert!("en-US-x".parse::<Locale>().is_err());
    }

    #[test]
    fn test_locale_cerealizer_keeps_null() {
        let mut buf = ChunkedBuffer::new();
        let en: Locale = "en".parse().unwrap();
        buf.put_with(&LocaleCerealizer, &Some(en.clone())).unwrap();
        buf.put_with(&LocaleCerealizer, &None::<Locale>).unwrap();
        assert_eq!(buf.get_with(&LocaleCerealizer).unwrap(), Some(en));
        assert_eq!(buf.get_with(&LocaleCerealizer).unwrap(), None);
    }

    #[test]
    fn test_list_of_strings() {
        let list = ListCerealizer::new(StringCerealizer);
        let value = Some(vec![Some("a".to_string()), None, Some(String::new())]);
        let mut buf = ChunkedBuffer::new();
        list.cerealize_to(&mut buf, &value).unwrap();
        list.cerealize_to(&mut buf, &None::<Vec<Option<String>>>).unwrap();
        let first: Option<Vec<Option<String>>> = list.uncerealize_from(&mut buf).unwrap();
        let second: Option<Vec<Option<String>>> = list.uncerealize_from(&mut buf).unwrap();
        assert_eq!(first, value);
        assert_eq!(second, None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bridge_uses_factory_and_decode() {
        let bridge = CerealizableCerealizer::<BitMap>::new();
        let mut map = BitMap::new(4);
        map.set(2, true).unwrap();
        let mut buf = ChunkedBuffer::new();
        bridge.cerealize_to(&mut buf, &map).unwrap();
        assert_eq!(bridge.uncerealize_from(&mut buf).unwrap(), map);
    }

    #[test]
    fn test_uuid_cerealizer_array() {
        let ids = vec![Uuid::new_v4(), Uuid::nil()];
        let mut buf = ChunkedBuffer::new();
        buf.put_array_with(&UuidCerealizer, &ids).unwrap();
        assert_eq!(buf.get_array_with(&UuidCerealizer).unwrap(), ids);
    }
}
