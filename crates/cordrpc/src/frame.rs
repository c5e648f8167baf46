//! # Protocol Frames
//!
//! The envelope around every request and reply.
//!
//! ```text
//! Request => { seq: u64, body: <Kind> => { ...fields } }
//! Reply   => { seq: u64, ok: Payload } | { seq: u64, err: Failure }
//! ```
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`.
//! - **Forward Compatibility**: Unknown map keys are skipped.

use cordpack::Decoder;
use cordpack::Encoder;

use crate::codec::decode_value;
use crate::codec::encode_value;
use crate::error::Error;
use crate::error::Failure;
use crate::error::LoadFailureKind;
use crate::error::Result;
use crate::op::Operation;
use crate::value::RefId;
use crate::value::Value;

/// Strong type for root handle identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RootId(pub u64);

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "root-{}", self.0)
    }
}

/// What an operation's path is relative to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The root object itself.
    Root(RootId),
    /// An entry of the root's reference registry.
    Reference { root: RootId, id: RefId },
}

impl Target {
    pub fn root(&self) -> RootId {
        match self {
            Self::Root(root) | Self::Reference { root, .. } => *root,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureEncoding {
    /// Raw PNG bytes.
    #[default]
    Binary,
    /// PNG bytes as a base64 string.
    Base64,
}

/// A capture rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    pub encoding: CaptureEncoding,
    pub clip: Option<Clip>,
}

/// Everything the controller can ask of the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CreateRoot { width: u32, height: u32 },
    AttachRoot { name: String },
    Invoke { target: Target, op: Operation },
    Resolve { root: RootId, id: RefId },
    Release { root: RootId },
    Capture { root: RootId, options: CaptureOptions },
    LoadImage { root: RootId, src: String },
    LoadFont { root: RootId, family: String, src: String },
    Shutdown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoot { .. } => "CreateRoot",
            Self::AttachRoot { .. } => "AttachRoot",
            Self::Invoke { .. } => "Invoke",
            Self::Resolve { .. } => "Resolve",
            Self::Release { .. } => "Release",
            Self::Capture { .. } => "Capture",
            Self::LoadImage { .. } => "LoadImage",
            Self::LoadFont { .. } => "LoadFont",
            Self::Shutdown => "Shutdown",
        }
    }

    /// The root this request is addressed to, if any.
    pub fn root(&self) -> Option<RootId> {
        match self {
            Self::Invoke { target, .. } => Some(target.root()),
            Self::Resolve { root, .. }
            | Self::Release { root }
            | Self::Capture { root, .. }
            | Self::LoadImage { root, .. }
            | Self::LoadFont { root, .. } => Some(*root),
            Self::CreateRoot { .. } | Self::AttachRoot { .. } | Self::Shutdown => None,
        }
    }

    fn encode_body(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(self.name())?;
        enc.map_begin()?;
        match self {
            Self::CreateRoot { width, height } => {
                write_u64(enc, "width", u64::from(*width))?;
                write_u64(enc, "height", u64::from(*height))?;
            }
            Self::AttachRoot { name } => write_str(enc, "name", name)?,
            Self::Invoke { target, op } => {
                write_target(enc, target)?;
                enc.variant_begin("op")?;
                op.encode(enc)?;
                enc.variant_end()?;
            }
            Self::Resolve { root, id } => {
                write_u64(enc, "root", root.0)?;
                write_str(enc, "id", id.as_str())?;
            }
            Self::Release { root } => write_u64(enc, "root", root.0)?,
            Self::Capture { root, options } => {
                write_u64(enc, "root", root.0)?;
                let encoding = match options.encoding {
                    CaptureEncoding::Binary => "binary",
                    CaptureEncoding::Base64 => "base64",
                };
                write_str(enc, "encoding", encoding)?;
                if let Some(clip) = options.clip {
                    enc.variant_begin("clip")?;
                    enc.list_begin()?;
                    for v in [clip.x, clip.y, clip.width, clip.height] {
                        enc.u64(u64::from(v))?;
                    }
                    enc.list_end()?;
                    enc.variant_end()?;
                }
            }
            Self::LoadImage { root, src } => {
                write_u64(enc, "root", root.0)?;
                write_str(enc, "src", src)?;
            }
            Self::LoadFont { root, family, src } => {
                write_u64(enc, "root", root.0)?;
                write_str(enc, "family", family)?;
                write_str(enc, "src", src)?;
            }
            Self::Shutdown => {}
        }
        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    fn decode_body(dec: &mut Decoder) -> Result<Self> {
        let (kind, mut body) = dec.variant()?;
        let mut fields = Fields::read(&mut body)?;

        let request = match kind {
            "CreateRoot" => Self::CreateRoot {
                width: fields.u32("width")?,
                height: fields.u32("height")?,
            },
            "AttachRoot" => Self::AttachRoot { name: fields.string("name")? },
            "Invoke" => Self::Invoke {
                target: fields.target()?,
                op: Operation::decode(&mut fields.take("op")?)?,
            },
            "Resolve" => Self::Resolve {
                root: RootId(fields.u64("root")?),
                id: RefId::new(fields.string("id")?),
            },
            "Release" => Self::Release { root: RootId(fields.u64("root")?) },
            "Capture" => {
                let encoding = match fields.string("encoding")?.as_str() {
                    "binary" => CaptureEncoding::Binary,
                    "base64" => CaptureEncoding::Base64,
                    other => return Err(Error::UnknownVariant(format!("capture encoding: {}", other))),
                };
                let clip = match fields.optional("clip") {
                    None => None,
                    Some(mut dec) => {
                        let mut iter = dec.list()?;
                        let mut parts = [0u32; 4];
                        for part in parts.iter_mut() {
                            let mut item = iter
                                .next()?
                                .ok_or(Error::ProtocolViolation("clip needs four numbers".into()))?;
                            *part = narrow(item.u64()?)?;
                        }
                        Some(Clip { x: parts[0], y: parts[1], width: parts[2], height: parts[3] })
                    }
                };
                Self::Capture {
                    root: RootId(fields.u64("root")?),
                    options: CaptureOptions { encoding, clip },
                }
            }
            "LoadImage" => Self::LoadImage {
                root: RootId(fields.u64("root")?),
                src: fields.string("src")?,
            },
            "LoadFont" => Self::LoadFont {
                root: RootId(fields.u64("root")?),
                family: fields.string("family")?,
                src: fields.string("src")?,
            },
            "Shutdown" => Self::Shutdown,
            other => return Err(Error::UnknownVariant(format!("request: {}", other))),
        };
        Ok(request)
    }
}

/// What a successful reply carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Unit,
    Value(Value),
    Root(RootId),
}

/// An outbound or inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub seq: u64,
    pub request: Request,
}

impl RequestFrame {
    pub fn new(seq: u64, request: Request) -> Self {
        Self { seq, request }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin("Request")?;
        enc.map_begin()?;
        write_u64(enc, "seq", self.seq)?;
        enc.variant_begin("body")?;
        self.request.encode_body(enc)?;
        enc.variant_end()?;
        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    fn decode_body(dec: &mut Decoder) -> Result<Self> {
        let mut fields = Fields::read(dec)?;
        Ok(Self {
            seq: fields.u64("seq")?,
            request: Request::decode_body(&mut fields.take("body")?)?,
        })
    }
}

/// The answer to one request, correlated by `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub seq: u64,
    pub status: std::result::Result<Payload, Failure>,
}

impl ReplyFrame {
    pub fn ok(seq: u64, payload: Payload) -> Self {
        Self { seq, status: Ok(payload) }
    }

    pub fn err(seq: u64, failure: Failure) -> Self {
        Self { seq, status: Err(failure) }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin("Reply")?;
        enc.map_begin()?;
        write_u64(enc, "seq", self.seq)?;
        match &self.status {
            Ok(payload) => {
                enc.variant_begin("ok")?;
                encode_payload(enc, payload)?;
                enc.variant_end()?;
            }
            Err(failure) => {
                enc.variant_begin("err")?;
                encode_failure(enc, failure)?;
                enc.variant_end()?;
            }
        }
        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    fn decode_body(dec: &mut Decoder) -> Result<Self> {
        let mut fields = Fields::read(dec)?;
        let seq = fields.u64("seq")?;
        let status = if let Some(mut ok) = fields.optional("ok") {
            Ok(decode_payload(&mut ok)?)
        } else if let Some(mut err) = fields.optional("err") {
            Err(decode_failure(&mut err)?)
        } else {
            return Err(Error::ProtocolViolation("reply without status".into()));
        };
        Ok(Self { seq, status })
    }
}

/// Top-level frame decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(RequestFrame),
    Reply(ReplyFrame),
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let (kind, mut body) = dec.variant()?;
        match kind {
            "Request" => Ok(Self::Request(RequestFrame::decode_body(&mut body)?)),
            "Reply" => Ok(Self::Reply(ReplyFrame::decode_body(&mut body)?)),
            other => Err(Error::UnknownVariant(format!("frame: {}", other))),
        }
    }
}

/// Recovers the sequence number of a frame whose body may not fully decode.
///
/// Lets the sandbox answer a garbled request with a `Protocol` failure instead
/// of leaving the caller waiting forever.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (_, mut body) = dec.variant()?;
    let mut map = body.map()?;
    while let Some((key, mut val)) = map.next()? {
        if key == "seq" {
            return Ok(val.u64()?);
        }
        val.skip()?;
    }
    Err(Error::ProtocolViolation("missing seq".into()))
}

fn encode_payload(enc: &mut Encoder, payload: &Payload) -> Result<()> {
    match payload {
        Payload::Unit => enc.tag("unit")?,
        Payload::Value(value) => {
            enc.variant_begin("value")?;
            encode_value(enc, value)?;
            enc.variant_end()?;
        }
        Payload::Root(root) => {
            enc.variant_begin("root")?;
            enc.u64(root.0)?;
            enc.variant_end()?;
        }
    }
    Ok(())
}

fn decode_payload(dec: &mut Decoder) -> Result<Payload> {
    let (kind, mut body) = dec.variant()?;
    match kind {
        "unit" => Ok(Payload::Unit),
        "value" => Ok(Payload::Value(decode_value(&mut body)?)),
        "root" => Ok(Payload::Root(RootId(body.u64()?))),
        other => Err(Error::UnknownVariant(format!("payload: {}", other))),
    }
}

fn encode_failure(enc: &mut Encoder, failure: &Failure) -> Result<()> {
    let name = match failure {
        Failure::Init(_) => "Init",
        Failure::Thrown { .. } => "Thrown",
        Failure::Load { .. } => "Load",
        Failure::RegistryMiss { .. } => "RegistryMiss",
        Failure::Protocol(_) => "Protocol",
    };
    enc.variant_begin(name)?;
    enc.map_begin()?;
    match failure {
        Failure::Init(message) | Failure::Protocol(message) => write_str(enc, "message", message)?,
        Failure::Thrown { name, message } => {
            write_str(enc, "name", name)?;
            write_str(enc, "message", message)?;
        }
        Failure::Load { kind, message } => {
            write_str(enc, "kind", kind.as_tag())?;
            write_str(enc, "message", message)?;
        }
        Failure::RegistryMiss { root, id } => {
            write_u64(enc, "root", root.0)?;
            if let Some(id) = id {
                write_str(enc, "id", id.as_str())?;
            }
        }
    }
    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_failure(dec: &mut Decoder) -> Result<Failure> {
    let (kind, mut body) = dec.variant()?;
    let mut fields = Fields::read(&mut body)?;
    let failure = match kind {
        "Init" => Failure::Init(fields.string("message")?),
        "Protocol" => Failure::Protocol(fields.string("message")?),
        "Thrown" => Failure::Thrown {
            name: fields.string("name")?,
            message: fields.string("message")?,
        },
        "Load" => Failure::Load {
            kind: LoadFailureKind::from_tag(&fields.string("kind")?)?,
            message: fields.string("message")?,
        },
        "RegistryMiss" => Failure::RegistryMiss {
            root: RootId(fields.u64("root")?),
            id: match fields.optional("id") {
                Some(mut dec) => Some(RefId::new(dec.str()?)),
                None => None,
            },
        },
        other => return Err(Error::UnknownVariant(format!("failure: {}", other))),
    };
    Ok(failure)
}

fn write_u64(enc: &mut Encoder, key: &str, val: u64) -> Result<()> {
    enc.variant_begin(key)?;
    enc.u64(val)?;
    enc.variant_end()?;
    Ok(())
}

fn write_str(enc: &mut Encoder, key: &str, val: &str) -> Result<()> {
    enc.variant_begin(key)?;
    enc.str(val)?;
    enc.variant_end()?;
    Ok(())
}

fn write_target(enc: &mut Encoder, target: &Target) -> Result<()> {
    write_u64(enc, "root", target.root().0)?;
    if let Target::Reference { id, .. } = target {
        write_str(enc, "ref", id.as_str())?;
    }
    Ok(())
}

fn narrow(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::ProtocolViolation(format!("{} does not fit in u32", v)))
}

/// The entries of a decoded map, looked up by key.
struct Fields<'a> {
    entries: Vec<(&'a str, Decoder<'a>)>,
}

impl<'a> Fields<'a> {
    fn read(dec: &mut Decoder<'a>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut entries = Vec::new();
        while let Some(entry) = map.next()? {
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    fn optional(&mut self, key: &str) -> Option<Decoder<'a>> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.swap_remove(pos).1)
    }

    fn take(&mut self, key: &str) -> Result<Decoder<'a>> {
        self.optional(key)
            .ok_or_else(|| Error::ProtocolViolation(format!("missing {}", key)))
    }

    fn u64(&mut self, key: &str) -> Result<u64> {
        Ok(self.take(key)?.u64()?)
    }

    fn u32(&mut self, key: &str) -> Result<u32> {
        narrow(self.u64(key)?)
    }

    fn string(&mut self, key: &str) -> Result<String> {
        Ok(self.take(key)?.str()?.to_string())
    }

    fn target(&mut self) -> Result<Target> {
        let root = RootId(self.u64("root")?);
        match self.optional("ref") {
            Some(mut dec) => Ok(Target::Reference { root, id: RefId::new(dec.str()?) }),
            None => Ok(Target::Root(root)),
        }
    }
}
