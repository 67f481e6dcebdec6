//! Filesystem-agnostic byte access for headers and chunk payloads.
//!
//! A location is an opaque string: a local path, a `file://` url, an
//! `http(s)://` url, or an `s3://` / `gs://` object which is read through the
//! provider's anonymous public HTTPS endpoint.

use crate::constants::{GCS_PUBLIC_ENDPOINT, MAX_CHUNK_BYTES, S3_PUBLIC_ENDPOINT};
use crate::error::{RetrievalError, Result};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::RANGE};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Byte access shared by every worker; implementations must be reentrant.
#[async_trait]
pub trait ByteSource: Send + Sync + std::fmt::Debug {
    /// Read a whole object
    async fn read_all(&self, location: &str) -> Result<Vec<u8>>;

    /// Read `length` bytes starting at `offset`
    async fn read_range(&self, location: &str, offset: u64, length: u64) -> Result<Vec<u8>>;
}

/// Resolved form of a location string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Http(String),
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(RetrievalError::unreachable(location, "empty location"));
        }

        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(Location::Local(PathBuf::from(path)));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Location::Http(trimmed.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("s3://") {
            let (bucket, key) = split_bucket(location, rest)?;
            return Ok(Location::Http(format!(
                "https://{}.{}/{}",
                bucket, S3_PUBLIC_ENDPOINT, key
            )));
        }
        if let Some(rest) = trimmed.strip_prefix("gs://") {
            let (bucket, key) = split_bucket(location, rest)?;
            return Ok(Location::Http(format!(
                "{}/{}/{}",
                GCS_PUBLIC_ENDPOINT, bucket, key
            )));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(RetrievalError::unreachable(
                location,
                format!("unsupported scheme '{}'", scheme),
            ));
        }

        Ok(Location::Local(PathBuf::from(trimmed)))
    }
}

fn split_bucket<'a>(location: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(RetrievalError::unreachable(
            location,
            "object store location must be <scheme>://bucket/key",
        )),
    }
}

/// Default byte source for local files and HTTP(S) / object store urls
#[derive(Debug, Clone, Default)]
pub struct StoreClient {
    client: Client,
}

impl StoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, headers, timeouts)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, location: &str, url: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some((offset, length)) = range {
            request = request.header(
                RANGE,
                format!("bytes={}-{}", offset, offset + length.saturating_sub(1)),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::unreachable(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::unreachable(
                location,
                format!("HTTP {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RetrievalError::unreachable(location, e))?;

        match range {
            // Server ignored the range header and sent the whole object
            Some((offset, length)) if status == StatusCode::OK => {
                slice_range(location, &bytes, offset, length)
            }
            _ => Ok(bytes.to_vec()),
        }
    }
}

fn slice_range(location: &str, bytes: &[u8], offset: u64, length: u64) -> Result<Vec<u8>> {
    let start = offset as usize;
    let end = start.saturating_add(length as usize);
    if end > bytes.len() {
        return Err(RetrievalError::unreachable(
            location,
            format!(
                "range {}..{} exceeds object size {}",
                start,
                end,
                bytes.len()
            ),
        ));
    }
    Ok(bytes[start..end].to_vec())
}

#[async_trait]
impl ByteSource for StoreClient {
    async fn read_all(&self, location: &str) -> Result<Vec<u8>> {
        debug!("Reading {}", location);
        match Location::parse(location)? {
            Location::Local(path) => fs::read(&path)
                .await
                .map_err(|e| RetrievalError::unreachable(location, e)),
            Location::Http(url) => self.get(location, &url, None).await,
        }
    }

    async fn read_range(&self, location: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        debug!("Reading {} bytes at {} from {}", length, offset, location);
        if length > MAX_CHUNK_BYTES {
            return Err(RetrievalError::unsupported(
                location,
                format!("range of {} bytes exceeds the {} byte limit", length, MAX_CHUNK_BYTES),
            ));
        }
        match Location::parse(location)? {
            Location::Local(path) => {
                let mut file = fs::File::open(&path)
                    .await
                    .map_err(|e| RetrievalError::unreachable(location, e))?;
                file.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|e| RetrievalError::unreachable(location, e))?;
                let mut buffer = vec![0u8; length as usize];
                file.read_exact(&mut buffer)
                    .await
                    .map_err(|e| RetrievalError::unreachable(location, e))?;
                Ok(buffer)
            }
            Location::Http(url) => self.get(location, &url, Some((offset, length))).await,
        }
    }
}
