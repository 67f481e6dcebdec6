//! Error handling for streamflow retrieval operations.
//!
//! Every failure raised while fetching, resolving or extracting from a single
//! header names the location it came from, so a failed batch can be traced
//! back to the offending file.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::FeatureId;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Unreachable source: {location} - {reason}")]
    UnreachableSource { location: String, reason: String },

    #[error("Malformed header at {location}: {reason}")]
    MalformedHeader { location: String, reason: String },

    #[error("Unsupported layout in header {location}: {reason}")]
    UnsupportedLayout { location: String, reason: String },

    #[error("Feature {feature_id} not found in header {location}")]
    FeatureNotFound {
        location: String,
        feature_id: FeatureId,
    },

    #[error("Inconsistent result shape from {location}: {reason}")]
    InconsistentResultShape { location: String, reason: String },

    #[error("Header {location} has an empty time axis")]
    EmptyTimeAxis { location: String },

    #[error("Corrupt chunk referenced by {location}: {reason}")]
    CorruptChunk { location: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to write output {path}: {reason}")]
    Output { path: PathBuf, reason: String },
}

impl RetrievalError {
    pub fn unreachable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnreachableSource {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedLayout {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_chunk(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptChunk {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Location of the header that produced this error, if it is tied to one
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::UnreachableSource { location, .. }
            | Self::MalformedHeader { location, .. }
            | Self::UnsupportedLayout { location, .. }
            | Self::FeatureNotFound { location, .. }
            | Self::InconsistentResultShape { location, .. }
            | Self::EmptyTimeAxis { location }
            | Self::CorruptChunk { location, .. } => Some(location),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
