//! Image and font loading.
//!
//! Loads go through a `Fetch` implementation. The default `AssetStore` serves
//! named assets registered on the context builder plus `data:` URLs, which is
//! how a canvas snapshot (`toDataURL()`) is fed back in as an image.

use std::collections::HashMap;

use base64::Engine;

use cordrpc::Failure;
use cordrpc::LoadFailureKind;

use crate::sandbox::png;
use crate::sandbox::surface::Bitmap;
use crate::sandbox::surface::FontFace;
use crate::sandbox::surface::Image;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Nothing is served under this source.
    NotFound(String),
    /// The fetch was cancelled before completing.
    Aborted(String),
    /// The source is malformed.
    Invalid(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(src) => write!(f, "no resource at {}", src),
            Self::Aborted(src) => write!(f, "fetch of {} aborted", src),
            Self::Invalid(why) => write!(f, "invalid source: {}", why),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<FetchError> for Failure {
    fn from(e: FetchError) -> Self {
        let kind = match e {
            FetchError::Aborted(_) => LoadFailureKind::Aborted,
            FetchError::NotFound(_) | FetchError::Invalid(_) => LoadFailureKind::Error,
        };
        Failure::Load { kind, message: e.to_string() }
    }
}

/// Where the sandbox gets resource bytes from.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, src: &str) -> Result<Vec<u8>, FetchError>;
}

/// Named in-memory assets, plus `data:` URLs.
#[derive(Default, Clone)]
pub struct AssetStore {
    assets: HashMap<String, Vec<u8>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(name.into(), bytes);
    }
}

#[async_trait::async_trait]
impl Fetch for AssetStore {
    async fn fetch(&self, src: &str) -> Result<Vec<u8>, FetchError> {
        if src.starts_with("data:") {
            return decode_data_url(src);
        }
        self.assets
            .get(src)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(src.to_string()))
    }
}

/// Decodes `data:[<mediatype>][;base64],<data>`.
pub fn decode_data_url(src: &str) -> Result<Vec<u8>, FetchError> {
    let body = src
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::Invalid("not a data URL".into()))?;
    let (meta, data) = body
        .split_once(',')
        .ok_or_else(|| FetchError::Invalid("data URL without a comma".into()))?;

    if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| FetchError::Invalid(e.to_string()))
    } else {
        percent_decode(data)
    }
}

fn percent_decode(data: &str) -> Result<Vec<u8>, FetchError> {
    let bytes = data.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = data
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| FetchError::Invalid("bad percent escape".into()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Fetches and decodes a PNG no wider or taller than `max_dim`.
pub async fn load_image(fetcher: &dyn Fetch, src: &str, max_dim: u32) -> Result<Image, Failure> {
    let bytes = fetcher.fetch(src).await?;
    let image = png::decode_within(&bytes, max_dim).map_err(|e| Failure::Load {
        kind: LoadFailureKind::Error,
        message: format!("{}: {}", src, e),
    })?;
    Ok(Image::decoded(src, Bitmap::from(image)))
}

/// Signatures of TrueType, OpenType/CFF, legacy Apple TrueType, WOFF and WOFF2.
const FONT_SIGNATURES: &[[u8; 4]] = &[
    [0x00, 0x01, 0x00, 0x00],
    *b"OTTO",
    *b"true",
    *b"wOFF",
    *b"wOF2",
];

pub async fn load_font(fetcher: &dyn Fetch, family: &str, src: &str) -> Result<FontFace, Failure> {
    let bytes = fetcher.fetch(src).await?;
    let known = bytes
        .get(..4)
        .is_some_and(|head| FONT_SIGNATURES.iter().any(|sig| sig == head));
    if !known {
        return Err(Failure::Load {
            kind: LoadFailureKind::Error,
            message: format!("{}: not a font file", src),
        });
    }
    Ok(FontFace::new(family, bytes.len()))
}
