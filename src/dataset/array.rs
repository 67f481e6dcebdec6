//! Lazily read Zarr v2 arrays backed by header references.
//!
//! A `VirtualArray` knows its shape, chunk grid, codecs and where each chunk
//! lives. Nothing is read until a selection asks for it, and then only the
//! chunks covering the selected points are fetched.

use super::codec::{ByteOrder, Codec, CodecSpec, DataType, ElementKind};
use crate::constants::{
    ARRAY_DIMENSIONS_ATTR, CHUNK_FETCH_CONCURRENCY, MAX_CHUNK_BYTES, SUPPORTED_ZARR_FORMAT,
};
use crate::error::{RetrievalError, Result};
use crate::header::RefEntry;
use crate::store::ByteSource;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Raw `.zarray` document
#[derive(Debug, Clone, Deserialize)]
pub struct ZarrayMetadata {
    pub zarr_format: u32,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: Value,
    #[serde(default)]
    pub compressor: Option<CodecSpec>,
    #[serde(default)]
    pub filters: Option<Vec<CodecSpec>>,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub fill_value: Value,
    #[serde(default)]
    pub dimension_separator: Option<String>,
}

fn default_order() -> String {
    "C".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOrder {
    RowMajor,
    ColumnMajor,
}

/// CF attributes that affect decoded values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueAttributes {
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
    pub missing_values: Vec<f64>,
    pub units: Option<String>,
}

impl ValueAttributes {
    fn from_zattrs(attrs: &Value) -> Self {
        let number = |key: &str| attrs.get(key).and_then(Value::as_f64);
        let mut missing_values = Vec::new();
        for key in ["_FillValue", "missing_value"] {
            match attrs.get(key) {
                Some(Value::Array(items)) => missing_values.extend(items.iter().filter_map(Value::as_f64)),
                Some(value) => missing_values.extend(value.as_f64()),
                None => {}
            }
        }

        Self {
            scale_factor: number("scale_factor"),
            add_offset: number("add_offset"),
            missing_values,
            units: attrs.get("units").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// Addressable, lazily materialized array
#[derive(Debug, Clone)]
pub struct VirtualArray {
    name: String,
    location: String,
    dimensions: Vec<String>,
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    /// Decoded size of one chunk, bounded at construction
    chunk_bytes: usize,
    dtype: DataType,
    order: MemoryOrder,
    compressor: Option<Codec>,
    filters: Vec<Codec>,
    fill_value: Option<f64>,
    attributes: ValueAttributes,
    chunks: HashMap<Vec<usize>, RefEntry>,
}

impl VirtualArray {
    /// Build the array index from its metadata documents and chunk entries.
    /// Performs no I/O.
    pub fn from_metadata(
        location: &str,
        name: &str,
        zarray: Value,
        zattrs: Option<Value>,
        chunk_refs: Vec<(&str, &RefEntry)>,
    ) -> Result<Self> {
        let meta: ZarrayMetadata = serde_json::from_value(zarray).map_err(|e| {
            RetrievalError::malformed(location, format!("invalid .zarray for '{}': {}", name, e))
        })?;

        if meta.zarr_format != SUPPORTED_ZARR_FORMAT {
            return Err(RetrievalError::unsupported(
                location,
                format!("variable '{}' uses zarr format {}", name, meta.zarr_format),
            ));
        }

        if meta.chunks.len() != meta.shape.len() || meta.chunks.iter().any(|c| *c == 0) {
            return Err(RetrievalError::malformed(
                location,
                format!(
                    "variable '{}' has chunks {:?} incompatible with shape {:?}",
                    name, meta.chunks, meta.shape
                ),
            ));
        }

        let dtype = match &meta.dtype {
            Value::String(text) => DataType::parse(text),
            _ => None,
        }
        .ok_or_else(|| {
            RetrievalError::unsupported(location, format!("variable '{}' has dtype {}", name, meta.dtype))
        })?;

        let order = match meta.order.as_str() {
            "C" => MemoryOrder::RowMajor,
            "F" => MemoryOrder::ColumnMajor,
            other => {
                return Err(RetrievalError::unsupported(
                    location,
                    format!("variable '{}' has memory order '{}'", name, other),
                ));
            }
        };

        let codec = |spec: &CodecSpec| {
            Codec::from_spec(spec, dtype.size).map_err(|id| {
                RetrievalError::unsupported(location, format!("variable '{}' uses codec '{}'", name, id))
            })
        };
        let compressor = meta.compressor.as_ref().map(codec).transpose()?;
        let filters = meta
            .filters
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(codec)
            .collect::<Result<Vec<_>>>()?;

        let attrs = zattrs.unwrap_or(Value::Null);
        let dimensions = match attrs.get(ARRAY_DIMENSIONS_ATTR) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    RetrievalError::malformed(location, format!("variable '{}' has non-string dimension names", name))
                })?,
            Some(_) => {
                return Err(RetrievalError::malformed(
                    location,
                    format!("variable '{}' has an invalid {}", name, ARRAY_DIMENSIONS_ATTR),
                ));
            }
            // A 1-D array without names is its own coordinate
            None if meta.shape.len() == 1 => vec![name.to_string()],
            None if meta.shape.is_empty() => Vec::new(),
            None => {
                return Err(RetrievalError::malformed(
                    location,
                    format!("variable '{}' has no {}", name, ARRAY_DIMENSIONS_ATTR),
                ));
            }
        };

        if dimensions.len() != meta.shape.len() {
            return Err(RetrievalError::malformed(
                location,
                format!(
                    "variable '{}' names {} dimensions for a {}-d shape",
                    name,
                    dimensions.len(),
                    meta.shape.len()
                ),
            ));
        }

        let chunk_bytes = meta
            .chunks
            .iter()
            .try_fold(dtype.size, |acc, c| acc.checked_mul(*c))
            .filter(|bytes| *bytes as u64 <= MAX_CHUNK_BYTES)
            .ok_or_else(|| {
                RetrievalError::unsupported(
                    location,
                    format!(
                        "variable '{}' has chunks {:?} larger than {} bytes",
                        name, meta.chunks, MAX_CHUNK_BYTES
                    ),
                )
            })?;

        let separator = meta.dimension_separator.as_deref().unwrap_or(".");
        let grid = chunk_grid(&meta.shape, &meta.chunks);
        let mut chunks = HashMap::with_capacity(chunk_refs.len());
        for (suffix, entry) in chunk_refs {
            let index = parse_chunk_key(suffix, separator, &grid).ok_or_else(|| {
                RetrievalError::malformed(
                    location,
                    format!("variable '{}' has chunk key '{}' outside grid {:?}", name, suffix, grid),
                )
            })?;
            if let RefEntry::Remote { range: Some(range), .. } = entry {
                if range.length > MAX_CHUNK_BYTES {
                    return Err(RetrievalError::unsupported(
                        location,
                        format!(
                            "variable '{}' chunk '{}' references {} bytes",
                            name, suffix, range.length
                        ),
                    ));
                }
            }
            chunks.insert(index, entry.clone());
        }

        Ok(Self {
            name: name.to_string(),
            location: location.to_string(),
            dimensions,
            shape: meta.shape,
            chunk_shape: meta.chunks,
            chunk_bytes,
            dtype,
            order,
            compressor,
            filters,
            fill_value: fill_value_of(&meta.fill_value),
            attributes: ValueAttributes::from_zattrs(&attrs),
            chunks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn attributes(&self) -> &ValueAttributes {
        &self.attributes
    }

    /// Position of a named dimension
    pub fn axis(&self, dimension: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == dimension)
    }

    /// Number of chunks with a stored reference
    pub fn stored_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Read decoded values (scale/offset applied, fill and missing as NaN)
    /// at the given coordinates, in the order given
    pub async fn read_points(&self, source: &dyn ByteSource, points: &[Vec<usize>]) -> Result<Vec<f64>> {
        let raw = self.read_raw(source, points, |dtype, bytes, idx| dtype.value_f64(bytes, idx)).await?;
        Ok(raw.into_iter().map(|value| value.map_or(f64::NAN, |v| self.decode_value(v))).collect())
    }

    /// Read every element of a 1-D array as integers (coordinate lookups)
    pub async fn read_all_i64(&self, source: &dyn ByteSource) -> Result<Vec<i64>> {
        let points = self.all_points()?;
        let raw = self.read_raw(source, &points, |dtype, bytes, idx| dtype.value_i64(bytes, idx)).await?;
        raw.into_iter()
            .enumerate()
            .map(|(idx, value)| {
                value.ok_or_else(|| {
                    RetrievalError::malformed(
                        &self.location,
                        format!("coordinate '{}' has no value at index {}", self.name, idx),
                    )
                })
            })
            .collect()
    }

    /// Read every element of a 1-D array as raw (unscaled) floats
    pub async fn read_all_f64(&self, source: &dyn ByteSource) -> Result<Vec<Option<f64>>> {
        let points = self.all_points()?;
        self.read_raw(source, &points, |dtype, bytes, idx| dtype.value_f64(bytes, idx)).await
    }

    fn all_points(&self) -> Result<Vec<Vec<usize>>> {
        if self.shape.len() != 1 {
            return Err(RetrievalError::unsupported(
                &self.location,
                format!("coordinate '{}' must be 1-d, found shape {:?}", self.name, self.shape),
            ));
        }
        let bytes = (self.shape[0] as u64).saturating_mul(self.dtype.size as u64);
        if bytes > MAX_CHUNK_BYTES {
            return Err(RetrievalError::unsupported(
                &self.location,
                format!("coordinate '{}' of length {} is too large to read", self.name, self.shape[0]),
            ));
        }
        Ok((0..self.shape[0]).map(|i| vec![i]).collect())
    }

    fn decode_value(&self, raw: f64) -> f64 {
        if self.fill_value.is_some_and(|fill| fill == raw)
            || self.attributes.missing_values.iter().any(|m| *m == raw)
        {
            return f64::NAN;
        }
        raw * self.attributes.scale_factor.unwrap_or(1.0) + self.attributes.add_offset.unwrap_or(0.0)
    }

    /// Group points by chunk, fetch each touched chunk once, and pull out
    /// the raw elements. `None` marks an element equal to the fill value of
    /// a chunk that is absent from the header.
    async fn read_raw<T, F>(&self, source: &dyn ByteSource, points: &[Vec<usize>], read: F) -> Result<Vec<Option<T>>>
    where
        T: Copy,
        F: Fn(&DataType, &[u8], usize) -> T,
    {
        let mut by_chunk: BTreeMap<Vec<usize>, Vec<(usize, usize)>> = BTreeMap::new();
        for (position, point) in points.iter().enumerate() {
            let (chunk, offset) = self.locate(point)?;
            by_chunk.entry(chunk).or_default().push((position, offset));
        }

        debug!(
            "Reading {} points of '{}' from {} chunks ({} stored)",
            points.len(),
            self.name,
            by_chunk.len(),
            self.chunks.len()
        );

        let fetched: Vec<(Vec<usize>, Option<Vec<u8>>)> = stream::iter(by_chunk.keys().cloned())
            .map(|chunk| async move {
                let bytes = self.fetch_chunk(source, &chunk).await?;
                Ok::<_, RetrievalError>((chunk, bytes))
            })
            .buffer_unordered(CHUNK_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let mut output = vec![None; points.len()];
        for (chunk, bytes) in fetched {
            let Some(bytes) = bytes else {
                continue;
            };
            for (position, offset) in &by_chunk[&chunk] {
                output[*position] = Some(read(&self.dtype, &bytes, *offset));
            }
        }
        Ok(output)
    }

    /// Chunk index and element offset within the chunk for one point
    fn locate(&self, point: &[usize]) -> Result<(Vec<usize>, usize)> {
        if point.len() != self.shape.len() || point.iter().zip(&self.shape).any(|(p, s)| p >= s) {
            return Err(RetrievalError::malformed(
                &self.location,
                format!("index {:?} out of bounds for '{}' with shape {:?}", point, self.name, self.shape),
            ));
        }

        let chunk: Vec<usize> = point.iter().zip(&self.chunk_shape).map(|(p, c)| p / c).collect();
        let within: Vec<usize> = point.iter().zip(&self.chunk_shape).map(|(p, c)| p % c).collect();

        let offset = match self.order {
            MemoryOrder::RowMajor => within
                .iter()
                .zip(&self.chunk_shape)
                .fold(0, |acc, (i, extent)| acc * extent + i),
            MemoryOrder::ColumnMajor => within
                .iter()
                .zip(&self.chunk_shape)
                .rev()
                .fold(0, |acc, (i, extent)| acc * extent + i),
        };

        Ok((chunk, offset))
    }

    /// Fetch and decode one chunk; `None` when the header stores no reference
    async fn fetch_chunk(&self, source: &dyn ByteSource, chunk: &[usize]) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.chunks.get(chunk) else {
            return Ok(self.fill_value.map(|fill| self.fill_chunk(fill)));
        };

        let encoded = match entry {
            RefEntry::Inline(bytes) => bytes.clone(),
            RefEntry::Remote { url, range: Some(range) } => {
                source.read_range(url, range.offset, range.length).await?
            }
            RefEntry::Remote { url, range: None } => source.read_all(url).await?,
        };

        let mut decoded = match &self.compressor {
            Some(codec) => codec.decode(&self.location, encoded)?,
            None => encoded,
        };
        for filter in self.filters.iter().rev() {
            decoded = filter.decode(&self.location, decoded)?;
        }

        let expected = self.chunk_bytes;
        if decoded.len() < expected {
            return Err(RetrievalError::corrupt_chunk(
                &self.location,
                format!(
                    "chunk {:?} of '{}' decoded to {} bytes, expected {}",
                    chunk,
                    self.name,
                    decoded.len(),
                    expected
                ),
            ));
        }
        Ok(Some(decoded))
    }

    /// Synthesize an absent chunk filled with the fill value
    fn fill_chunk(&self, fill: f64) -> Vec<u8> {
        let count = self.chunk_bytes / self.dtype.size;
        let element: Vec<u8> = match (self.dtype.kind, self.dtype.size) {
            (ElementKind::Float, 4) => (fill as f32).to_le_bytes().to_vec(),
            (ElementKind::Float, _) => fill.to_le_bytes().to_vec(),
            (_, size) => (fill as i64).to_le_bytes()[..size].to_vec(),
        };
        let element = match self.dtype.order {
            ByteOrder::Little => element,
            ByteOrder::Big => element.into_iter().rev().collect(),
        };
        element.repeat(count)
    }
}

/// Number of chunks along each dimension
fn chunk_grid(shape: &[usize], chunks: &[usize]) -> Vec<usize> {
    shape.iter().zip(chunks).map(|(s, c)| s.div_ceil(*c)).collect()
}

fn parse_chunk_key(key: &str, separator: &str, grid: &[usize]) -> Option<Vec<usize>> {
    // Scalars use a single "0" chunk
    if grid.is_empty() {
        return (key == "0").then(Vec::new);
    }

    let index: Vec<usize> = key
        .split(separator)
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;

    (index.len() == grid.len() && index.iter().zip(grid).all(|(i, g)| i < g)).then_some(index)
}

fn fill_value_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => match text.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}
