//! # Cordpack
//!
//! The byte layer underneath the marionette wire. Cordpack knows nothing about
//! operations or proxies; it moves a small set of dynamically-typed items:
//!
//! - **Scalars**: `[Tag: 1b][Data: N]` for undefined, null, booleans, `u64`, `f64`.
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]` for strings and byte strings.
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]` for lists, maps and variants.
//!
//! All integers are little-endian. Container lengths are back-patched when a
//! scope closes, so decoders can skip any item without understanding it.

#[cfg(test)]
mod tests;

/// Cordpack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// Decoder expected one tag but found another.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container body exceeds `u32::MAX` bytes.
    TooLarge(usize),
    /// Closed a scope that is not the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Closed a scope when only the root remains.
    ScopeUnderflow,
    /// Finalized the buffer with scopes still open.
    ScopeStillOpen,
    /// Wrote something other than a variant directly into a map.
    InvalidMapEntry,
    /// Wrote a second payload into a variant.
    VariantOverfull,
    /// Closed a variant without writing its payload.
    VariantEmpty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Self::UnexpectedTag { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Self::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: closing {:?} while {:?} is open", expected, actual)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the kind of the next encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Undefined = 0x01,
    Null = 0x02,
    True = 0x03,
    False = 0x04,
    U64 = 0x05,
    F64 = 0x06,

    String = 0x10,
    Bytes = 0x11,

    List = 0x20,
    Map = 0x21,
    Variant = 0x22,
}

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::Undefined,
            0x02 => Self::Null,
            0x03 => Self::True,
            0x04 => Self::False,
            0x05 => Self::U64,
            0x06 => Self::F64,
            0x10 => Self::String,
            0x11 => Self::Bytes,
            0x20 => Self::List,
            0x21 => Self::Map,
            0x22 => Self::Variant,
            _ => return None,
        })
    }

    /// Size of the fixed payload following the tag, or `None` for length-prefixed items.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Undefined | Self::Null | Self::True | Self::False => Some(0),
            Self::U64 | Self::F64 => Some(8),
            Self::String | Self::Bytes | Self::List | Self::Map | Self::Variant => None,
        }
    }
}

/// Kind of an open container on the encoder stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Virtual bottom of the stack; accepts any number of items.
    Root,
    /// Accepts any number of items.
    List,
    /// Accepts only variants (key/value pairs).
    Map,
    /// Accepts exactly one payload after its name.
    Variant,
}

struct Open {
    /// Offset of the first body byte; the length slot sits just before it.
    body: usize,
    scope: Scope,
    items: usize,
}

/// Stack-checked encoder with back-patched container lengths.
///
/// Every write is validated against the innermost open scope, so a finished
/// buffer is always structurally well-formed.
pub struct Encoder {
    buf: Vec<u8>,
    stack: Vec<Open>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Open { body: 0, scope: Scope::Root, items: 0 }],
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    ///
    /// Fails with `ScopeStillOpen` if any container was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> Result<&mut Open> {
        self.stack.last_mut().ok_or(Error::ScopeUnderflow)
    }

    fn admit(&mut self, tag: Tag) -> Result<()> {
        let top = self.top()?;
        match top.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Variant => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            Scope::Variant if top.items == 0 => Ok(()),
            Scope::Variant => Err(Error::VariantOverfull),
        }
    }

    fn wrote_item(&mut self) -> Result<()> {
        self.top()?.items += 1;
        Ok(())
    }

    fn scalar(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(payload);
        self.wrote_item()
    }

    fn blob(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| Error::TooLarge(payload.len()))?;
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.wrote_item()
    }

    fn open(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0; 4]);
        self.stack.push(Open { body: self.buf.len(), scope, items: 0 });
        Ok(())
    }

    fn close(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }
        let open = self.stack.pop().ok_or(Error::ScopeUnderflow)?;
        if open.scope != expected {
            let actual = open.scope;
            self.stack.push(open);
            return Err(Error::ScopeMismatch { expected, actual });
        }
        if open.scope == Scope::Variant && open.items == 0 {
            self.stack.push(open);
            return Err(Error::VariantEmpty);
        }

        let body_len = self.buf.len() - open.body;
        let len = u32::try_from(body_len).map_err(|_| Error::TooLarge(body_len))?;
        self.buf[open.body - 4..open.body].copy_from_slice(&len.to_le_bytes());
        self.wrote_item()
    }

    pub fn undefined(&mut self) -> Result<()> { self.scalar(Tag::Undefined, &[]) }
    pub fn null(&mut self) -> Result<()> { self.scalar(Tag::Null, &[]) }
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.scalar(if v { Tag::True } else { Tag::False }, &[])
    }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(Tag::F64, &v.to_le_bytes()) }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::String, v.as_bytes()) }
    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    pub fn list_begin(&mut self) -> Result<()> { self.open(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.close(Scope::List) }

    /// Begins a map. Only `variant_begin` may be used directly inside it.
    pub fn map_begin(&mut self) -> Result<()> { self.open(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.close(Scope::Map) }

    /// Begins a named payload. Exactly one item must follow before `variant_end`.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.open(Tag::Variant, Scope::Variant)?;
        let len = u32::try_from(name.len()).map_err(|_| Error::TooLarge(name.len()))?;
        self.buf.push(Tag::String as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.close(Scope::Variant) }

    /// Writes `name => ()` where the payload carries no data.
    pub fn tag(&mut self, name: &str) -> Result<()> {
        self.variant_begin(name)?;
        self.undefined()?;
        self.variant_end()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked view over encoded bytes.
///
/// Reading advances the view. Container reads hand out new decoders limited
/// to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        self.take(len)
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect(expected)?;
        Ok(Decoder::new(self.len_prefixed()?))
    }

    /// Skips the next item, including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag.fixed_width() {
            Some(n) => { self.take(n)?; }
            None => { self.len_prefixed()?; }
        }
        Ok(())
    }

    pub fn undefined(&mut self) -> Result<()> { self.expect(Tag::Undefined) }
    pub fn null(&mut self) -> Result<()> { self.expect(Tag::Null) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.expect(Tag::U64)?;
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.expect(Tag::F64)?;
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String)?;
        std::str::from_utf8(self.len_prefixed()?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        self.len_prefixed()
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Returns `(name, payload)` of the next variant.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = self.enter(Tag::Variant)?;
        let name = body.str()?;
        Ok((name, body))
    }
}

/// Iterates the items of a list, one sub-decoder per item.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns the next item, `Ok(None)` at the end, or an error if the body is truncated.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.is_empty() {
            return Ok(None);
        }
        let mut ahead = self.dec.clone();
        ahead.skip()?;
        let len = self.dec.remaining() - ahead.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterates the key/value pairs of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.is_empty() {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
