//! # Codec
//!
//! Translation between `Value` and the cordpack wire format.
//!
//! ## Invariants
//! - **Recursion Safety**: Encoding and decoding are bounded by `MAX_DEPTH`.
//! - **Self-Describing**: Values carry their own tags; no schema is needed to decode.

use cordpack::Decoder;
use cordpack::Encoder;
use cordpack::Tag;

use crate::error::Error;
use crate::error::Result;
use crate::value::RefId;
use crate::value::Segment;
use crate::value::Value;

/// Maximum nesting depth for lists and maps.
pub const MAX_DEPTH: usize = 64;

const REF_TAG: &str = "ref";
const INDEX_TAG: &str = "index";

pub fn encode_value(enc: &mut Encoder, val: &Value) -> Result<()> {
    encode_value_at(enc, val, 0)
}

fn encode_value_at(enc: &mut Encoder, val: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match val {
        Value::Undefined => enc.undefined()?,
        Value::Null => enc.null()?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::Number(n) => enc.f64(*n)?,
        Value::String(s) => enc.str(s)?,
        Value::Bytes(b) => enc.bytes(b)?,
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value_at(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Map(entries) => {
            enc.map_begin()?;
            for (key, item) in entries {
                enc.variant_begin(key)?;
                encode_value_at(enc, item, depth + 1)?;
                enc.variant_end()?;
            }
            enc.map_end()?;
        }
        Value::Ref(id) => {
            enc.variant_begin(REF_TAG)?;
            enc.str(id.as_str())?;
            enc.variant_end()?;
        }
    }
    Ok(())
}

pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_value_at(dec, 0)
}

fn decode_value_at(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let value = match dec.peek_tag()? {
        Tag::Undefined => { dec.undefined()?; Value::Undefined }
        Tag::Null => { dec.null()?; Value::Null }
        Tag::True | Tag::False => Value::Bool(dec.bool()?),
        Tag::F64 => Value::Number(dec.f64()?),
        Tag::U64 => {
            return Err(Error::ProtocolViolation("integers are not values; numbers travel as f64".into()));
        }
        Tag::String => Value::String(dec.str()?.to_string()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::List => {
            let mut iter = dec.list()?;
            let mut items = Vec::new();
            while let Some(mut item) = iter.next()? {
                items.push(decode_value_at(&mut item, depth + 1)?);
            }
            Value::List(items)
        }
        Tag::Map => {
            let mut iter = dec.map()?;
            let mut entries = Vec::new();
            while let Some((key, mut item)) = iter.next()? {
                entries.push((key.to_string(), decode_value_at(&mut item, depth + 1)?));
            }
            Value::Map(entries)
        }
        Tag::Variant => {
            let (name, mut body) = dec.variant()?;
            if name != REF_TAG {
                return Err(Error::UnknownVariant(format!("value: {}", name)));
            }
            Value::Ref(RefId::new(body.str()?))
        }
    };
    Ok(value)
}

/// Encodes a list of values, e.g. call arguments.
pub fn encode_values(enc: &mut Encoder, vals: &[Value]) -> Result<()> {
    enc.list_begin()?;
    for val in vals {
        encode_value(enc, val)?;
    }
    enc.list_end()?;
    Ok(())
}

pub fn decode_values(dec: &mut Decoder) -> Result<Vec<Value>> {
    let mut iter = dec.list()?;
    let mut vals = Vec::new();
    while let Some(mut item) = iter.next()? {
        vals.push(decode_value(&mut item)?);
    }
    Ok(vals)
}

/// Encodes a property path. Names are strings; indices are `index => u64` variants.
pub fn encode_path(enc: &mut Encoder, path: &[Segment]) -> Result<()> {
    enc.list_begin()?;
    for segment in path {
        match segment {
            Segment::Name(name) => enc.str(name)?,
            Segment::Index(i) => {
                enc.variant_begin(INDEX_TAG)?;
                enc.u64(u64::from(*i))?;
                enc.variant_end()?;
            }
        }
    }
    enc.list_end()?;
    Ok(())
}

pub fn decode_path(dec: &mut Decoder) -> Result<Vec<Segment>> {
    let mut iter = dec.list()?;
    let mut path = Vec::new();
    while let Some(mut item) = iter.next()? {
        let segment = match item.peek_tag()? {
            Tag::String => Segment::Name(item.str()?.to_string()),
            Tag::Variant => {
                let (name, mut body) = item.variant()?;
                if name != INDEX_TAG {
                    return Err(Error::UnknownVariant(format!("path segment: {}", name)));
                }
                let raw = body.u64()?;
                let index = u32::try_from(raw)
                    .map_err(|_| Error::ProtocolViolation(format!("index {} out of range", raw)))?;
                Segment::Index(index)
            }
            other => {
                return Err(Error::ProtocolViolation(format!("path segment tagged {:?}", other)));
            }
        };
        path.push(segment);
    }
    Ok(path)
}
