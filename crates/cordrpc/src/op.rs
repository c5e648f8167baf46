//! The Operation: one Get, Set or Apply against a remote object tree.

use cordpack::Decoder;
use cordpack::Encoder;

use crate::codec::decode_path;
use crate::codec::decode_value;
use crate::codec::decode_values;
use crate::codec::encode_path;
use crate::codec::encode_value;
use crate::codec::encode_values;
use crate::error::Error;
use crate::error::Result;
use crate::value::Segment;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read the value at `path`.
    Get,
    /// Assign `value` to the last segment of `path` on the object at the rest of it.
    Set,
    /// Call the value at `path` with the object at `path[..n-1]` as receiver.
    Apply,
}

impl OpKind {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Apply => "APPLY",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "GET" => Ok(Self::Get),
            "SET" => Ok(Self::Set),
            "APPLY" => Ok(Self::Apply),
            other => Err(Error::UnknownVariant(format!("operation kind: {}", other))),
        }
    }
}

/// A single remote action, relative to a root or a bound reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub path: Vec<Segment>,
    pub value: Option<Value>,
    pub args: Vec<Value>,
}

impl Operation {
    pub fn get(path: Vec<Segment>) -> Self {
        Self { kind: OpKind::Get, path, value: None, args: Vec::new() }
    }

    pub fn set(path: Vec<Segment>, value: Value) -> Self {
        Self { kind: OpKind::Set, path, value: Some(value), args: Vec::new() }
    }

    pub fn apply(path: Vec<Segment>, args: Vec<Value>) -> Self {
        Self { kind: OpKind::Apply, path, value: None, args }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;

        enc.variant_begin("type")?;
        enc.str(self.kind.as_tag())?;
        enc.variant_end()?;

        enc.variant_begin("path")?;
        encode_path(enc, &self.path)?;
        enc.variant_end()?;

        if let Some(value) = &self.value {
            enc.variant_begin("value")?;
            encode_value(enc, value)?;
            enc.variant_end()?;
        }

        if !self.args.is_empty() {
            enc.variant_begin("args")?;
            encode_values(enc, &self.args)?;
            enc.variant_end()?;
        }

        enc.map_end()?;
        Ok(())
    }

    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        let mut map = dec.map()?;
        let mut kind = None;
        let mut path = Vec::new();
        let mut value = None;
        let mut args = Vec::new();

        while let Some((key, mut val)) = map.next()? {
            match key {
                "type" => kind = Some(OpKind::from_tag(val.str()?)?),
                "path" => path = decode_path(&mut val)?,
                "value" => value = Some(decode_value(&mut val)?),
                "args" => args = decode_values(&mut val)?,
                _ => val.skip()?,
            }
        }

        Ok(Self {
            kind: kind.ok_or(Error::ProtocolViolation("operation without type".into()))?,
            path,
            value,
            args,
        })
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", self.kind.as_tag())?;
        if self.path.is_empty() {
            write!(f, "<self>")?;
        }
        for (i, segment) in self.path.iter().enumerate() {
            match segment {
                Segment::Index(_) => write!(f, "{}", segment)?,
                Segment::Name(_) if i == 0 => write!(f, "{}", segment)?,
                Segment::Name(_) => write!(f, ".{}", segment)?,
            }
        }
        if self.kind == OpKind::Apply {
            write!(f, "({} args)", self.args.len())?;
        }
        Ok(())
    }
}
