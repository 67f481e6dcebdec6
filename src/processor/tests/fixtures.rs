//! In-memory byte source and synthetic reference headers

use crate::error::{RetrievalError, Result};
use crate::models::{FeatureId, Timestamp};
use crate::store::ByteSource;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const FILL_VALUE: f64 = -9999.0;
const TIME_UNITS: &str = "minutes since 1970-01-01 00:00:00 UTC";

/// Midnight on 2024-01-01 plus `h` hours
pub fn hour(h: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
}

/// Byte source backed by a map, recording every ranged read
#[derive(Debug, Default)]
pub struct RecordingSource {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    range_reads: Mutex<Vec<(String, u64, u64)>>,
}

impl RecordingSource {
    pub fn insert(&self, location: impl Into<String>, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(location.into(), bytes);
    }

    pub fn range_reads(&self) -> Vec<(String, u64, u64)> {
        self.range_reads.lock().unwrap().clone()
    }

    fn object(&self, location: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| RetrievalError::unreachable(location, "no such object"))
    }
}

#[async_trait]
impl ByteSource for RecordingSource {
    async fn read_all(&self, location: &str) -> Result<Vec<u8>> {
        self.object(location)
    }

    async fn read_range(&self, location: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let bytes = self.object(location)?;
        self.range_reads
            .lock()
            .unwrap()
            .push((location.to_string(), offset, length));

        let start = offset as usize;
        let end = start + length as usize;
        bytes
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RetrievalError::unreachable(location, "range past end of object"))
    }
}

/// A small NWM-like header: `streamflow(time, feature_id)` as `<f8`,
/// `feature_id` as `<i8` and `time` as `<i4` minutes since the epoch.
#[derive(Debug, Clone)]
pub struct HeaderFixture {
    feature_ids: Vec<FeatureId>,
    times: Vec<Timestamp>,
    /// One row per time step, one value per feature
    rows: Vec<Vec<f64>>,
    feature_chunk: usize,
}

impl HeaderFixture {
    pub fn new(feature_ids: &[FeatureId], times: &[Timestamp], rows: &[Vec<f64>]) -> Self {
        assert_eq!(times.len(), rows.len(), "one row per time step");
        assert!(rows.iter().all(|row| row.len() == feature_ids.len()));
        Self {
            feature_ids: feature_ids.to_vec(),
            times: times.to_vec(),
            rows: rows.to_vec(),
            feature_chunk: 2,
        }
    }

    pub fn with_feature_chunk(mut self, size: usize) -> Self {
        self.feature_chunk = size.max(1);
        self
    }

    /// Header with every chunk inline
    pub fn to_json(&self) -> String {
        self.render(None).0
    }

    /// Store the header as `{name}.json` with its payload in `{name}.bin`.
    /// Returns the header location.
    pub fn install(&self, source: &RecordingSource, name: &str) -> String {
        let payload_url = format!("{}.bin", name);
        let (json, payload) = self.render(Some(&payload_url));
        source.insert(payload_url, payload);

        let location = format!("{}.json", name);
        source.insert(location.clone(), json.into_bytes());
        location
    }

    /// Write the header and payload under `dir`, returning the header path
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let payload_path = dir.join(format!("{}.bin", name));
        let (json, payload) = self.render(Some(&payload_path.to_string_lossy()));
        std::fs::write(&payload_path, payload).unwrap();

        let header_path = dir.join(format!("{}.json", name));
        std::fs::write(&header_path, json).unwrap();
        header_path
    }

    fn chunk_count(&self) -> usize {
        self.feature_ids.len().div_ceil(self.feature_chunk)
    }

    /// Streamflow chunks keyed "t.c", each `feature_chunk` values padded with fill
    fn streamflow_chunks(&self) -> Vec<(String, Vec<u8>)> {
        let mut chunks = Vec::new();
        for (t, row) in self.rows.iter().enumerate() {
            for c in 0..self.chunk_count() {
                let bytes: Vec<u8> = (0..self.feature_chunk)
                    .map(|i| row.get(c * self.feature_chunk + i).copied().unwrap_or(FILL_VALUE))
                    .flat_map(f64::to_le_bytes)
                    .collect();
                chunks.push((format!("{}.{}", t, c), bytes));
            }
        }
        chunks
    }

    fn render(&self, payload_url: Option<&str>) -> (String, Vec<u8>) {
        let features = self.feature_ids.len();
        let steps = self.times.len();
        let mut refs = Map::new();

        let mut metadata = |name: &str, zarray: Value, zattrs: Value| {
            refs.insert(format!("{}/.zarray", name), Value::String(zarray.to_string()));
            refs.insert(format!("{}/.zattrs", name), Value::String(zattrs.to_string()));
        };
        metadata(
            "streamflow",
            json!({
                "zarr_format": 2, "shape": [steps, features], "chunks": [1, self.feature_chunk],
                "dtype": "<f8", "compressor": null, "filters": null, "order": "C",
                "fill_value": FILL_VALUE
            }),
            json!({"_ARRAY_DIMENSIONS": ["time", "feature_id"], "units": "m3 s-1"}),
        );
        metadata(
            "feature_id",
            json!({
                "zarr_format": 2, "shape": [features], "chunks": [features.max(1)],
                "dtype": "<i8", "compressor": null, "filters": null, "order": "C", "fill_value": null
            }),
            json!({"_ARRAY_DIMENSIONS": ["feature_id"]}),
        );
        metadata(
            "time",
            json!({
                "zarr_format": 2, "shape": [steps], "chunks": [steps.max(1)],
                "dtype": "<i4", "compressor": null, "filters": null, "order": "C", "fill_value": null
            }),
            json!({"_ARRAY_DIMENSIONS": ["time"], "units": TIME_UNITS}),
        );

        let inline = |bytes: &[u8]| Value::String(format!("base64:{}", STANDARD.encode(bytes)));

        if features > 0 {
            let ids: Vec<u8> = self.feature_ids.iter().flat_map(|id| id.to_le_bytes()).collect();
            refs.insert("feature_id/0".to_string(), inline(&ids));
        }
        if steps > 0 {
            let minutes: Vec<u8> = self
                .times
                .iter()
                .flat_map(|t| ((t.timestamp() / 60) as i32).to_le_bytes())
                .collect();
            refs.insert("time/0".to_string(), inline(&minutes));
        }

        let mut payload = Vec::new();
        for (key, bytes) in self.streamflow_chunks() {
            let entry = match payload_url {
                Some(url) => {
                    let entry = json!([url, payload.len(), bytes.len()]);
                    payload.extend_from_slice(&bytes);
                    entry
                }
                None => inline(&bytes),
            };
            refs.insert(format!("streamflow/{}", key), entry);
        }

        let document = json!({"version": 1, "refs": refs});
        (document.to_string(), payload)
    }
}
