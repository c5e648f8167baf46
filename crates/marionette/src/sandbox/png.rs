//! Minimal PNG codec for captures and loaded images.
//!
//! Encodes 8-bit RGBA with filter type 0. Decodes non-interlaced 8-bit
//! grayscale, gray+alpha, RGB and RGBA with any of the five row filters.

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::Crc;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NotPng,
    Truncated,
    BadChecksum(String),
    Unsupported(String),
    Corrupt(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPng => write!(f, "not a PNG image"),
            Self::Truncated => write!(f, "PNG data ends early"),
            Self::BadChecksum(chunk) => write!(f, "bad CRC in {} chunk", chunk),
            Self::Unsupported(what) => write!(f, "unsupported PNG: {}", what),
            Self::Corrupt(what) => write!(f, "corrupt PNG: {}", what),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Decoded image, always RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

pub fn encode(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>> {
    let stride = width as usize * 4;
    if width == 0 || height == 0 || stride.checked_mul(height as usize) != Some(rgba.len()) {
        return Err(Error::Corrupt(format!("{}x{} image with {} bytes", width, height, rgba.len())));
    }

    let mut raw = Vec::with_capacity((stride + 1) * height as usize);
    for row in rgba.chunks(stride) {
        raw.push(0);
        raw.extend_from_slice(row);
    }

    let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
    zlib.write_all(&raw).map_err(|e| Error::Corrupt(e.to_string()))?;
    let idat = zlib.finish().map_err(|e| Error::Corrupt(e.to_string()))?;

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

    let mut out = SIGNATURE.to_vec();
    write_chunk(&mut out, b"IHDR", &ihdr);
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(kind, data).to_be_bytes());
}

fn chunk_crc(kind: &[u8], data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    crc.sum()
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

pub fn decode(bytes: &[u8]) -> Result<Image> {
    decode_within(bytes, u32::MAX)
}

/// Like `decode`, but rejects images wider or taller than `max_dim` before
/// inflating anything.
pub fn decode_within(bytes: &[u8], max_dim: u32) -> Result<Image> {
    if !is_png(bytes) {
        return Err(Error::NotPng);
    }

    let mut rest = &bytes[SIGNATURE.len()..];
    let mut header = None;
    let mut idat = Vec::new();

    loop {
        if rest.len() < 12 {
            return Err(Error::Truncated);
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if rest.len() < 12 + len {
            return Err(Error::Truncated);
        }
        let kind = &rest[4..8];
        let data = &rest[8..8 + len];
        let crc = u32::from_be_bytes([rest[8 + len], rest[9 + len], rest[10 + len], rest[11 + len]]);
        if chunk_crc(kind, data) != crc {
            return Err(Error::BadChecksum(String::from_utf8_lossy(kind).into_owned()));
        }
        rest = &rest[12 + len..];

        match kind {
            b"IHDR" => header = Some(Header::parse(data, max_dim)?),
            b"IDAT" => idat.extend_from_slice(data),
            b"IEND" => break,
            _ => {}
        }
    }

    let header = header.ok_or(Error::Corrupt("missing IHDR".into()))?;
    // Never inflate past what the header accounts for.
    let mut raw = Vec::new();
    ZlibDecoder::new(idat.as_slice())
        .take((header.raw_len as u64).saturating_add(1))
        .read_to_end(&mut raw)
        .map_err(|e| Error::Corrupt(e.to_string()))?;

    let rows = unfilter(&header, &raw)?;
    Ok(Image {
        width: header.width,
        height: header.height,
        rgba: header.expand(&rows),
    })
}

struct Header {
    width: u32,
    height: u32,
    channels: usize,
    /// Bytes per unfiltered row.
    stride: usize,
    /// Bytes of filtered scanlines, filter bytes included.
    raw_len: usize,
}

impl Header {
    fn parse(data: &[u8], max_dim: u32) -> Result<Self> {
        if data.len() != 13 {
            return Err(Error::Corrupt("IHDR length".into()));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let (depth, color, interlace) = (data[8], data[9], data[12]);

        if width == 0 || height == 0 {
            return Err(Error::Corrupt("zero dimension".into()));
        }
        if width > max_dim || height > max_dim {
            return Err(Error::Unsupported(format!(
                "{}x{} exceeds the {} pixel limit",
                width, height, max_dim
            )));
        }
        if depth != 8 {
            return Err(Error::Unsupported(format!("bit depth {}", depth)));
        }
        if interlace != 0 {
            return Err(Error::Unsupported("interlacing".into()));
        }
        let channels = match color {
            0 => 1,
            2 => 3,
            4 => 2,
            6 => 4,
            other => return Err(Error::Unsupported(format!("color type {}", other))),
        };
        let too_large = || Error::Corrupt(format!("{}x{} image is too large", width, height));
        let stride = (width as usize).checked_mul(channels).ok_or_else(too_large)?;
        let raw_len = stride
            .checked_add(1)
            .and_then(|line| line.checked_mul(height as usize))
            .ok_or_else(too_large)?;
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(too_large)?;
        Ok(Self { width, height, channels, stride, raw_len })
    }

    fn expand(&self, pixels: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() / self.channels * 4);
        for px in pixels.chunks(self.channels) {
            match *px {
                [g] => out.extend_from_slice(&[g, g, g, 255]),
                [g, a] => out.extend_from_slice(&[g, g, g, a]),
                [r, g, b] => out.extend_from_slice(&[r, g, b, 255]),
                [r, g, b, a] => out.extend_from_slice(&[r, g, b, a]),
                _ => {}
            }
        }
        out
    }
}

fn unfilter(header: &Header, raw: &[u8]) -> Result<Vec<u8>> {
    let stride = header.stride;
    let bpp = header.channels;
    let height = header.height as usize;
    if raw.len() < header.raw_len {
        return Err(Error::Truncated);
    }

    let mut out = vec![0u8; stride * height];
    for y in 0..height {
        let line = &raw[y * (stride + 1)..(y + 1) * (stride + 1)];
        let (filter, src) = (line[0], &line[1..]);
        let (done, todo) = out.split_at_mut(y * stride);
        let prev = if y == 0 { None } else { Some(&done[(y - 1) * stride..]) };
        let cur = &mut todo[..stride];

        for x in 0..stride {
            let a = if x >= bpp { cur[x - bpp] } else { 0 };
            let b = prev.map_or(0, |p| p[x]);
            let c = if x >= bpp { prev.map_or(0, |p| p[x - bpp]) } else { 0 };
            let predicted = match filter {
                0 => 0,
                1 => a,
                2 => b,
                3 => ((u16::from(a) + u16::from(b)) / 2) as u8,
                4 => paeth(a, b, c),
                other => return Err(Error::Corrupt(format!("filter type {}", other))),
            };
            cur[x] = src[x].wrapping_add(predicted);
        }
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
