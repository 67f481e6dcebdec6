//! Pipeline tests for the processor module
//!
//! Exercises the full retrieval flow against synthetic reference headers
//! served from memory or written to temporary directories.

pub mod fixtures;
