use crate::*;

#[test]
fn test_scalars_decode_in_order() -> Result<()> {
    let mut enc = Encoder::new();
    enc.undefined()?;
    enc.null()?;
    enc.bool(true)?;
    enc.bool(false)?;
    enc.u64(u64::MAX)?;
    enc.f64(-0.5)?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    dec.undefined()?;
    dec.null()?;
    assert!(dec.bool()?);
    assert!(!dec.bool()?);
    assert_eq!(dec.u64()?, u64::MAX);
    assert_eq!(dec.f64()?, -0.5);
    assert!(dec.is_empty());
    Ok(())
}

#[test]
fn test_blobs_are_zero_copy_views() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("strokeRect")?;
    enc.bytes(&[0x89, b'P', b'N', b'G'])?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.str()?, "strokeRect");
    assert_eq!(dec.bytes()?, &[0x89, b'P', b'N', b'G']);
    Ok(())
}

#[test]
fn test_nested_containers() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.variant_begin("path")?;
    enc.list_begin()?;
    enc.str("ctx")?;
    enc.str("lineWidth")?;
    enc.list_end()?;
    enc.variant_end()?;
    enc.variant_begin("value")?;
    enc.f64(10.0)?;
    enc.variant_end()?;
    enc.map_end()?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);
    let mut map = dec.map()?;

    let (key, mut val) = map.next()?.expect("path entry");
    assert_eq!(key, "path");
    let mut items = val.list()?;
    assert_eq!(items.next()?.expect("first").str()?, "ctx");
    assert_eq!(items.next()?.expect("second").str()?, "lineWidth");
    assert!(items.next()?.is_none());

    let (key, mut val) = map.next()?.expect("value entry");
    assert_eq!(key, "value");
    assert_eq!(val.f64()?, 10.0);
    assert!(map.next()?.is_none());
    Ok(())
}

#[test]
fn test_skip_unknown_items() -> Result<()> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    enc.map_begin()?;
    enc.tag("ignored")?;
    enc.map_end()?;
    enc.list_end()?;
    enc.str("after")?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);
    dec.skip()?;
    assert_eq!(dec.str()?, "after");
    Ok(())
}

#[test]
fn test_map_rejects_bare_items() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert_eq!(enc.f64(1.0), Err(Error::InvalidMapEntry));
}

#[test]
fn test_variant_requires_exactly_one_payload() {
    let mut enc = Encoder::new();
    enc.variant_begin("v").unwrap();
    assert_eq!(enc.variant_end(), Err(Error::VariantEmpty));

    enc.null().unwrap();
    assert_eq!(enc.null(), Err(Error::VariantOverfull));
    enc.variant_end().unwrap();
    assert!(enc.into_bytes().is_ok());
}

#[test]
fn test_scope_errors() {
    let mut enc = Encoder::new();
    assert_eq!(enc.list_end(), Err(Error::ScopeUnderflow));

    enc.list_begin().unwrap();
    assert_eq!(
        enc.map_end(),
        Err(Error::ScopeMismatch { expected: Scope::Map, actual: Scope::List })
    );
    assert!(matches!(enc.into_bytes(), Err(Error::ScopeStillOpen)));
}

#[test]
fn test_truncated_input() {
    let mut enc = Encoder::new();
    enc.str("truncated").unwrap();
    let bytes = enc.into_bytes().unwrap();

    let mut dec = Decoder::new(&bytes[..bytes.len() - 2]);
    assert_eq!(dec.str(), Err(Error::UnexpectedEnd));
}

#[test]
fn test_wrong_tag_is_reported() {
    let mut enc = Encoder::new();
    enc.f64(1.0).unwrap();
    let bytes = enc.into_bytes().unwrap();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(
        dec.u64(),
        Err(Error::UnexpectedTag { expected: Tag::U64, found: Tag::F64 })
    );
    assert_eq!(Decoder::new(&[0x7f]).peek_tag(), Err(Error::InvalidTag(0x7f)));
}

#[test]
fn test_invalid_utf8() {
    let bytes = [Tag::String as u8, 2, 0, 0, 0, 0xff, 0xfe];
    assert_eq!(Decoder::new(&bytes).str(), Err(Error::InvalidUtf8));
}
