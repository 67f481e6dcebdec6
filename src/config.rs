//! Configuration management and worker sizing.
//!
//! Provides the retrieval configuration (variable names, worker count,
//! output settings), host resource profiling and the policy that turns
//! both into a concrete worker count for a batch.

use crate::constants::{
    DEFAULT_FEATURE_DIMENSION, DEFAULT_TIME_DIMENSION, DEFAULT_VALUE_VARIABLE, FALLBACK_WORKERS,
    MEMORY_PER_WORKER_MB,
};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Names used to locate the value variable and its coordinates in a header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableNames {
    /// Variable holding the requested values
    pub value_variable: String,
    /// Dimension (and coordinate variable) holding feature identifiers
    pub feature_dimension: String,
    /// Dimension (and coordinate variable) holding valid times
    pub time_dimension: String,
}

impl Default for VariableNames {
    fn default() -> Self {
        Self {
            value_variable: DEFAULT_VALUE_VARIABLE.to_string(),
            feature_dimension: DEFAULT_FEATURE_DIMENSION.to_string(),
            time_dimension: DEFAULT_TIME_DIMENSION.to_string(),
        }
    }
}

/// Supported output table formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Csv,
    /// Snappy compressed Parquet
    Parquet,
}

impl OutputFormat {
    /// Infer the format from a file extension, defaulting to CSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }

    /// Parse a user supplied format name
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "parquet" | "pq" => Some(OutputFormat::Parquet),
            _ => None,
        }
    }

    pub fn parquet_compression(&self) -> ParquetCompression {
        ParquetCompression::Snappy
    }
}

/// System profiling information used as a sizing hint
#[derive(Debug, Clone)]
pub struct SystemProfile {
    /// Number of logical CPU cores available
    pub cpu_cores: usize,
    /// Available memory in MB (0 = unknown)
    pub memory_mb: usize,
    /// Physical cores
    pub performance_cores: usize,
}

impl SystemProfile {
    /// Auto-detect system capabilities
    pub fn detect() -> Self {
        use sysinfo::System;

        let cpu_cores = num_cpus::get();
        let performance_cores = num_cpus::get_physical();

        let mut system = System::new();
        system.refresh_memory();
        let memory_mb = (system.available_memory() / 1024 / 1024) as usize;

        Self {
            cpu_cores,
            memory_mb,
            performance_cores,
        }
    }

    /// Fixed profile, for deterministic sizing in tests and embedding
    pub fn fixed(performance_cores: usize, memory_mb: usize) -> Self {
        Self {
            cpu_cores: performance_cores,
            memory_mb,
            performance_cores,
        }
    }

    /// Worker count suggested by the host alone
    pub fn suggested_workers(&self) -> usize {
        let from_cores = if self.performance_cores > 0 {
            self.performance_cores
        } else if self.cpu_cores > 0 {
            self.cpu_cores
        } else {
            FALLBACK_WORKERS
        };

        if self.memory_mb == 0 {
            return from_cores;
        }

        let from_memory = (self.memory_mb / MEMORY_PER_WORKER_MB).max(1);
        from_cores.min(from_memory)
    }
}

/// Resolve the concrete worker count for a batch of `location_count` headers.
///
/// An explicit request wins over the host suggestion; either way the result
/// lies in `[1, location_count]` (or is 1 for an empty batch).
pub fn resolve_worker_count(
    requested: Option<usize>,
    profile: &SystemProfile,
    location_count: usize,
) -> usize {
    let base = requested.unwrap_or_else(|| profile.suggested_workers());
    let upper = location_count.max(1);
    let workers = base.clamp(1, upper);

    debug!(
        "Worker sizing: {} workers (requested: {:?}, {} physical cores, {}MB memory, {} locations)",
        workers, requested, profile.performance_cores, profile.memory_mb, location_count
    );

    workers
}

/// Global configuration for a retrieval run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Requested worker count (None = size from host resources)
    pub workers: Option<usize>,

    /// Variable and dimension names
    pub variables: VariableNames,

    /// Show a progress bar while dispatching
    pub show_progress: bool,

    /// Print a coloured summary when the run completes
    pub print_summary: bool,

    /// Optional output table
    pub output_path: Option<PathBuf>,

    /// Output format (None = infer from the output path)
    pub output_format: Option<OutputFormat>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            workers: None,
            variables: VariableNames::default(),
            show_progress: true,
            print_summary: true,
            output_path: None,
            output_format: None,
        }
    }
}

impl RetrievalConfig {
    /// Create configuration with custom worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Use a different value variable
    pub fn with_value_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.value_variable = name.into();
        self
    }

    /// Use a different feature dimension
    pub fn with_feature_dimension(mut self, name: impl Into<String>) -> Self {
        self.variables.feature_dimension = name.into();
        self
    }

    /// Use a different time dimension
    pub fn with_time_dimension(mut self, name: impl Into<String>) -> Self {
        self.variables.time_dimension = name.into();
        self
    }

    /// Write the assembled series to a file
    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    /// Force the output format
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Disable terminal progress and summary output
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self.print_summary = false;
        self
    }

    /// Effective output format for the configured path
    pub fn effective_output_format(&self) -> Option<OutputFormat> {
        let path = self.output_path.as_ref()?;
        Some(self.output_format.unwrap_or_else(|| OutputFormat::from_path(path)))
    }
}
