//! Element types and chunk codecs of the supported Zarr v2 subset.

use crate::error::{RetrievalError, Result};

use flate2::read::{GzDecoder, ZlibDecoder};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int,
    UInt,
    Float,
}

/// Numeric element type parsed from a zarr `dtype` string such as `<i4`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    pub kind: ElementKind,
    pub size: usize,
    pub order: ByteOrder,
}

macro_rules! read_element {
    ($ty:ty, $bytes:expr, $order:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(buf),
            ByteOrder::Big => <$ty>::from_be_bytes(buf),
        }
    }};
}

impl DataType {
    /// Parse a numpy-style type string; returns `None` for anything outside
    /// the fixed-width numeric types
    pub fn parse(dtype: &str) -> Option<Self> {
        let mut chars = dtype.chars();
        let order = match chars.next()? {
            '<' | '|' => ByteOrder::Little,
            '>' => ByteOrder::Big,
            _ => return None,
        };
        let kind = match chars.next()? {
            'i' => ElementKind::Int,
            'u' => ElementKind::UInt,
            'f' => ElementKind::Float,
            _ => return None,
        };
        let size: usize = chars.as_str().parse().ok()?;

        let valid = match kind {
            ElementKind::Int | ElementKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ElementKind::Float => matches!(size, 4 | 8),
        };
        valid.then_some(Self { kind, size, order })
    }

    fn element(&self, bytes: &[u8]) -> Element {
        match (self.kind, self.size) {
            (ElementKind::Int, 1) => Element::Int(bytes[0] as i8 as i64),
            (ElementKind::Int, 2) => Element::Int(read_element!(i16, bytes, self.order) as i64),
            (ElementKind::Int, 4) => Element::Int(read_element!(i32, bytes, self.order) as i64),
            (ElementKind::Int, _) => Element::Int(read_element!(i64, bytes, self.order)),
            (ElementKind::UInt, 1) => Element::Int(bytes[0] as i64),
            (ElementKind::UInt, 2) => Element::Int(read_element!(u16, bytes, self.order) as i64),
            (ElementKind::UInt, 4) => Element::Int(read_element!(u32, bytes, self.order) as i64),
            (ElementKind::UInt, _) => Element::Float(read_element!(u64, bytes, self.order) as f64),
            (ElementKind::Float, 4) => Element::Float(read_element!(f32, bytes, self.order) as f64),
            (ElementKind::Float, _) => Element::Float(read_element!(f64, bytes, self.order)),
        }
    }

    /// Element at `index` as f64
    pub fn value_f64(&self, bytes: &[u8], index: usize) -> f64 {
        let start = index * self.size;
        match self.element(&bytes[start..start + self.size]) {
            Element::Int(v) => v as f64,
            Element::Float(v) => v,
        }
    }

    /// Element at `index` as i64, truncating floats
    pub fn value_i64(&self, bytes: &[u8], index: usize) -> i64 {
        let start = index * self.size;
        match self.element(&bytes[start..start + self.size]) {
            Element::Int(v) => v,
            Element::Float(v) => v as i64,
        }
    }
}

enum Element {
    Int(i64),
    Float(f64),
}

/// Codec configuration as written in `.zarray`
#[derive(Debug, Clone, Deserialize)]
pub struct CodecSpec {
    pub id: String,
    #[serde(default)]
    pub elementsize: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Gzip,
    Shuffle { element_size: usize },
}

impl Codec {
    /// Interpret a codec spec; unknown ids are reported back to the caller
    pub fn from_spec(spec: &CodecSpec, default_element_size: usize) -> std::result::Result<Self, String> {
        match spec.id.as_str() {
            "zlib" => Ok(Codec::Zlib),
            "gzip" => Ok(Codec::Gzip),
            "shuffle" => Ok(Codec::Shuffle {
                element_size: spec.elementsize.unwrap_or(default_element_size),
            }),
            other => Err(other.to_string()),
        }
    }

    /// Undo this codec
    pub fn decode(&self, location: &str, input: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Codec::Zlib => inflate(location, ZlibDecoder::new(input.as_slice()), "zlib"),
            Codec::Gzip => inflate(location, GzDecoder::new(input.as_slice()), "gzip"),
            Codec::Shuffle { element_size } => Ok(unshuffle(&input, *element_size)),
        }
    }
}

fn inflate(location: &str, mut decoder: impl Read, name: &str) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| RetrievalError::corrupt_chunk(location, format!("{} decode failed: {}", name, e)))?;
    Ok(output)
}

/// Reverse the HDF5/numcodecs byte shuffle filter
fn unshuffle(input: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || input.len() < element_size {
        return input.to_vec();
    }

    let count = input.len() / element_size;
    let mut output = vec![0u8; input.len()];
    for byte in 0..element_size {
        for element in 0..count {
            output[element * element_size + byte] = input[byte * count + element];
        }
    }
    // Trailing bytes that do not form a whole element are left untouched
    let tail = count * element_size;
    output[tail..].copy_from_slice(&input[tail..]);
    output
}
