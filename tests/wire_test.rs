#![allow(missing_docs)]

use cereal::{
    BitMap, CerealError, ChunkedBuffer, ListCerealizer, Locale, LocaleCerealizer, StringCerealizer,
    UuidCerealizer,
};
use proptest::prelude::*;
use uuid::Uuid;

#[test]
fn test_primitive_extremes() -> cereal::Result<()> {
    let mut buf = ChunkedBuffer::new();
    buf.put_u8(u8::MAX);
    buf.put_i8(i8::MIN);
    buf.put_i16(i16::MIN);
    buf.put_i32(i32::MAX);
    buf.put_i64(i64::MIN);
    buf.put_f32(f32::INFINITY);
    buf.put_f64(f64::NEG_INFINITY);
    buf.put_f64(-0.0);
    buf.put_bool(true);

    assert_eq!(buf.len(), 1 + 1 + 2 + 4 + 8 + 4 + 8 + 8 + 1);
    assert_eq!(buf.get_u8()?, u8::MAX);
    assert_eq!(buf.get_i8()?, i8::MIN);
    assert_eq!(buf.get_i16()?, i16::MIN);
    assert_eq!(buf.get_i32()?, i32::MAX);
    assert_eq!(buf.get_i64()?, i64::MIN);
    assert_eq!(buf.get_f32()?, f32::INFINITY);
    assert_eq!(buf.get_f64()?, f64::NEG_INFINITY);
    assert_eq!(buf.get_f64()?.to_bits(), (-0.0f64).to_bits());
    assert!(buf.get_bool()?);
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_nan_is_canonical_on_the_wire() -> cereal::Result<()> {
    let mut buf = ChunkedBuffer::new();
    buf.put_f32(f32::from_bits(0xffc0_1234));
    buf.put_f64(f64::from_bits(0x7ff0_0000_0000_0001));

    assert_eq!(buf.copy_all(), vec![0x7f, 0xc0, 0, 0, 0x7f, 0xf8, 0, 0, 0, 0, 0, 0]);
    assert_eq!(buf.get_f32()?.to_bits(), 0x7fc0_0000);
    assert_eq!(buf.get_f64()?.to_bits(), 0x7ff8_0000_0000_0000);
    Ok(())
}

#[test]
fn test_null_and_empty_are_distinct() -> cereal::Result<()> {
    let mut buf = ChunkedBuffer::new();
    buf.put_str(None)?;
    buf.put_str(Some(""))?;
    buf.put_bytes(None)?;
    buf.put_bytes(Some(&[][..]))?;

    assert_eq!(buf.get_str()?, None);
    assert_eq!(buf.get_str()?.as_deref(), Some(""));
    assert_eq!(buf.get_bytes()?, None);
    assert_eq!(buf.get_bytes()?.map(|b| b.len()), Some(0));
    Ok(())
}

#[test]
fn test_short_string_payload_is_truncated() {
    let mut buf = ChunkedBuffer::new();
    buf.put_i32(10);
    buf.append_back(&b"abc"[..]);
    assert!(matches!(buf.get_str(), Err(CerealError::Truncated { .. })));
}

#[test]
fn test_length_below_null_is_out_of_range() {
    let mut buf = ChunkedBuffer::new();
    buf.put_i32(-2);
    assert!(matches!(buf.get_bytes(), Err(CerealError::OutOfRange(_))));
}

#[test]
fn test_lossy_text_replaces_and_decode_drops() -> cereal::Result<()> {
    let mut buf = ChunkedBuffer::new();
    buf.put_str_lossy(Some(&b"ok\xffok"[..]))?;
    assert_eq!(buf.get_str()?.as_deref(), Some("ok$ok"));

    let mut raw = ChunkedBuffer::new();
    raw.put_bytes(Some(&b"a\xc3b"[..]))?;
    assert_eq!(raw.get_str()?.as_deref(), Some("ab"));
    Ok(())
}

#[test]
fn test_arrays_of_records() -> cereal::Result<()> {
    let flat: Vec<BitMap> = (0..4).map(BitMap::new).collect();
    let jagged: Vec<Vec<BitMap>> = vec![vec![], vec![BitMap::new(9)], vec![BitMap::new(1), BitMap::new(2)]];
    let cube = vec![jagged.clone(), vec![]];

    let mut buf = ChunkedBuffer::new();
    buf.put_array(&flat)?;
    buf.put_array_2d(&jagged)?;
    buf.put_array_3d(&cube)?;

    let sizes = |v: &[BitMap]| v.iter().map(BitMap::size).collect::<Vec<_>>();
    assert_eq!(sizes(&buf.get_array::<BitMap>()?), vec![0, 1, 2, 3]);

    let back = buf.get_array_2d::<BitMap>()?;
    assert_eq!(back.len(), 3);
    assert_eq!(sizes(&back[2]), vec![1, 2]);

    let back = buf.get_array_3d::<BitMap>()?;
    assert_eq!(back.len(), 2);
    assert_eq!(back[0].len(), 3);
    assert!(back[1].is_empty());
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn test_stock_cerealizers() -> cereal::Result<()> {
    let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
    let locale: Locale = "pt_BR".parse()?;
    let names = ListCerealizer::new(StringCerealizer);

    let mut buf = ChunkedBuffer::new();
    buf.put_with(&UuidCerealizer, &id)?;
    buf.put_with(&LocaleCerealizer, &Some(locale.clone()))?;
    buf.put_with(&names, &Some(vec![Some("a".to_owned()), None]))?;

    assert_eq!(buf.len(), 16 + (4 + 5) + (4 + 4 + 1 + 4));
    assert_eq!(buf.get_with(&UuidCerealizer)?, id);
    assert_eq!(buf.get_with(&LocaleCerealizer)?, Some(locale));
    assert_eq!(
        buf.get_with(&names)?,
        Some(vec![Some("a".to_owned()), None])
    );
    Ok(())
}

#[test]
fn test_front_insertion_builds_a_header() -> cereal::Result<()> {
    let mut buf = ChunkedBuffer::new();
    buf.put_str(Some("body"))?;
    buf.put_i64_front(42);
    buf.put_str_front(Some("tag"))?;

    assert_eq!(buf.get_str()?.as_deref(), Some("tag"));
    assert_eq!(buf.get_i64()?, 42);
    assert_eq!(buf.get_str()?.as_deref(), Some("body"));
    Ok(())
}

proptest! {
    #[test]
    fn prop_text_round_trips(text in ".*", chunk in 1usize..8) {
        let mut buf = ChunkedBuffer::new();
        buf.put_str(Some(&text)).unwrap();

        // Re-split the encoding so the decoder crosses chunk boundaries.
        let bytes = buf.remove_all();
        let mut split = ChunkedBuffer::new();
        for piece in bytes.chunks(chunk) {
            split.append_back(bytes::Bytes::copy_from_slice(piece));
        }
        prop_assert_eq!(split.get_str().unwrap(), Some(text));
        prop_assert!(split.is_empty());
    }

    #[test]
    fn prop_float_bits_survive(bits in any::<u64>()) {
        let value = f64::from_bits(bits);
        let mut buf = ChunkedBuffer::new();
        buf.put_f64(value);
        let back = buf.get_f64().unwrap();
        if value.is_nan() {
            prop_assert_eq!(back.to_bits(), 0x7ff8_0000_0000_0000);
        } else {
            prop_assert_eq!(back.to_bits(), bits);
        }
    }
}
