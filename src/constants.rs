//! Application constants for the streamflow retriever
//!
//! Default variable names, object store endpoints and sizing limits used
//! throughout the crate.

// =============================================================================
// Dataset Variable Names
// =============================================================================

/// Variable holding the streamflow values in NWM channel output
pub const DEFAULT_VALUE_VARIABLE: &str = "streamflow";

/// Coordinate variable / dimension holding feature identifiers
pub const DEFAULT_FEATURE_DIMENSION: &str = "feature_id";

/// Coordinate variable / dimension holding valid times
pub const DEFAULT_TIME_DIMENSION: &str = "time";

// =============================================================================
// Reference Header Format
// =============================================================================

/// Suffix of the key holding Zarr v2 array metadata
pub const ZARRAY_SUFFIX: &str = ".zarray";

/// Suffix of the key holding array attributes
pub const ZATTRS_SUFFIX: &str = ".zattrs";

/// Attribute naming the dimensions of an array (xarray convention)
pub const ARRAY_DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Prefix marking base64 encoded inline reference data
pub const BASE64_PREFIX: &str = "base64:";

/// Only Zarr v2 array metadata can be resolved
pub const SUPPORTED_ZARR_FORMAT: u32 = 2;

// =============================================================================
// Object Store Endpoints
// =============================================================================

/// Anonymous public endpoint template for `s3://bucket/key` locations
pub const S3_PUBLIC_ENDPOINT: &str = "s3.amazonaws.com";

/// Anonymous public endpoint for `gs://bucket/key` locations
pub const GCS_PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";

// =============================================================================
// Worker Sizing
// =============================================================================

/// Memory budget assumed per concurrent worker when sizing from host memory
pub const MEMORY_PER_WORKER_MB: usize = 256;

/// Fallback worker count when the host reports no cores
pub const FALLBACK_WORKERS: usize = 1;

/// Maximum number of chunk reads in flight for a single header
pub const CHUNK_FETCH_CONCURRENCY: usize = 8;

/// Largest decoded chunk or byte range a header may reference
pub const MAX_CHUNK_BYTES: u64 = 1 << 30;
