//! NWM Streamflow Retrieval Library
//!
//! Retrieves National Water Model streamflow time series for a set of
//! feature identifiers from many kerchunk-style reference headers at once.
//!
//! This library provides tools for:
//! - Fetching reference headers from local paths, HTTP(S), S3 and GCS
//! - Resolving headers into lazy virtual zarr datasets
//! - Reading only the chunks that hold the requested features
//! - Running many headers concurrently with abort-on-first-failure
//! - Assembling time-ordered per-feature series and writing CSV or Parquet

pub mod cli;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod header;
pub mod models;
pub mod processor;
pub mod store;

pub use config::{OutputFormat, RetrievalConfig, SystemProfile, VariableNames};
pub use error::{RetrievalError, Result};
pub use models::{AssembledSeries, ExtractionResult, FeatureId, RetrievalStats, Timestamp};
pub use processor::{RetrievalOutcome, SeriesRetriever, process_location};
pub use store::{ByteSource, StoreClient};
