//! Core data structures shared across the retrieval pipeline.
//!
//! Defines feature identifiers, per-location extraction results, the
//! assembled time series and run statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a hydrologic feature (NWM reach / `feature_id`)
pub type FeatureId = i64;

/// Timestamps are always carried in UTC
pub type Timestamp = DateTime<Utc>;

/// Values and timestamps extracted from a single header
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    /// Location of the header this result was read from
    pub location: String,
    /// One inner vector per requested feature, one value per timestamp
    pub values: Vec<Vec<f64>>,
    /// Time coordinate of the source dataset
    pub timestamps: Vec<Timestamp>,
}

impl ExtractionResult {
    pub fn new(location: impl Into<String>, values: Vec<Vec<f64>>, timestamps: Vec<Timestamp>) -> Self {
        Self {
            location: location.into(),
            values,
            timestamps,
        }
    }

    /// Leading timestamp used as the merge key
    pub fn first_timestamp(&self) -> Option<&Timestamp> {
        self.timestamps.first()
    }
}

/// Per-feature series merged across every processed header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledSeries {
    pub feature_ids: Vec<FeatureId>,
    pub timestamps: Vec<Timestamp>,
    /// Parallel to `feature_ids`, each aligned with `timestamps`
    pub values: Vec<Vec<f64>>,
}

impl AssembledSeries {
    /// Values for a single feature
    pub fn get(&self, feature_id: FeatureId) -> Option<&[f64]> {
        self.feature_ids
            .iter()
            .position(|id| *id == feature_id)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Iterate `(feature_id, values)` pairs in request order
    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &[f64])> {
        self.feature_ids
            .iter()
            .copied()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Retrieval statistics reported at the end of a run
#[derive(Debug, Default)]
pub struct RetrievalStats {
    pub locations_processed: usize,
    pub features: usize,
    pub timesteps: usize,
    pub workers: usize,
    pub output_path: Option<PathBuf>,
    pub rows_written: usize,
    pub processing_time_ms: u128,
}
