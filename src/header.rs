//! Reference header fetching and decoding.
//!
//! A header is a kerchunk-style JSON reference index: a map from zarr keys
//! (`streamflow/.zarray`, `streamflow/0.0`, ...) to either inline data or a
//! `[url, offset, length]` pointer into the original binary file. Fetching a
//! header never touches the payload it describes.

use crate::constants::BASE64_PREFIX;
use crate::error::{RetrievalError, Result};
use crate::store::ByteSource;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::task;
use tracing::debug;

/// Byte range inside a referenced object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// One entry of the reference map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefEntry {
    /// Data carried inside the header itself
    Inline(Vec<u8>),
    /// Data living in another object, optionally a slice of it
    Remote { url: String, range: Option<ByteRange> },
}

/// Decoded reference index for one location
#[derive(Debug, Clone)]
pub struct Header {
    location: String,
    version: u32,
    refs: HashMap<String, RefEntry>,
}

impl Header {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&RefEntry> {
        self.refs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.refs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Parse an inline JSON metadata entry such as `.zarray` or `.zattrs`
    pub fn metadata_json(&self, key: &str) -> Result<Option<Value>> {
        match self.refs.get(key) {
            None => Ok(None),
            Some(RefEntry::Inline(bytes)) => serde_json::from_slice(bytes).map(Some).map_err(|e| {
                RetrievalError::malformed(&self.location, format!("invalid JSON in '{}': {}", key, e))
            }),
            Some(RefEntry::Remote { .. }) => Err(RetrievalError::malformed(
                &self.location,
                format!("metadata key '{}' must be inline", key),
            )),
        }
    }
}

/// Fetch and decode the header at `location`
pub async fn fetch_header(source: &dyn ByteSource, location: &str) -> Result<Header> {
    let bytes = source.read_all(location).await?;
    debug!("Fetched header {} ({} bytes)", location, bytes.len());

    let owned_location = location.to_string();
    task::spawn_blocking(move || parse_header(&owned_location, &bytes))
        .await
        .map_err(|e| RetrievalError::malformed(location, format!("header decode task failed: {}", e)))?
}

/// Decode header bytes fetched from `location`
pub fn parse_header(location: &str, bytes: &[u8]) -> Result<Header> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| RetrievalError::malformed(location, format!("invalid JSON: {}", e)))?;

    let Value::Object(mut root) = document else {
        return Err(RetrievalError::malformed(
            location,
            "header must be a JSON object",
        ));
    };

    // Version 1 nests the map under "refs"; version 0 is the map itself
    let (version, templates, raw_refs) = match root.remove("refs") {
        Some(Value::Object(refs)) => {
            let version = parse_version(location, root.get("version"))?;
            let templates = parse_templates(location, root.get("templates"))?;
            (version, templates, refs)
        }
        Some(_) => {
            return Err(RetrievalError::malformed(location, "'refs' must be an object"));
        }
        None => (0, HashMap::new(), root),
    };

    if raw_refs.is_empty() {
        return Err(RetrievalError::malformed(location, "header has no references"));
    }

    let refs = parse_refs(location, raw_refs, &templates)?;

    debug!(
        "Parsed header {}: version {}, {} references",
        location,
        version,
        refs.len()
    );

    Ok(Header {
        location: location.to_string(),
        version,
        refs,
    })
}

fn parse_version(location: &str, value: Option<&Value>) -> Result<u32> {
    match value {
        None => Ok(1),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(1),
        Some(other) => Err(RetrievalError::unsupported(
            location,
            format!("reference version {} is not supported", other),
        )),
    }
}

fn parse_templates(location: &str, value: Option<&Value>) -> Result<HashMap<String, String>> {
    let Some(value) = value else {
        return Ok(HashMap::new());
    };
    let Value::Object(map) = value else {
        return Err(RetrievalError::malformed(location, "'templates' must be an object"));
    };

    map.iter()
        .map(|(name, url)| match url {
            Value::String(url) => Ok((name.clone(), url.clone())),
            _ => Err(RetrievalError::malformed(
                location,
                format!("template '{}' must be a string", name),
            )),
        })
        .collect()
}

fn parse_refs(
    location: &str,
    raw: Map<String, Value>,
    templates: &HashMap<String, String>,
) -> Result<HashMap<String, RefEntry>> {
    let mut refs = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        let entry = parse_entry(location, &key, value, templates)?;
        refs.insert(key, entry);
    }
    Ok(refs)
}

fn parse_entry(
    location: &str,
    key: &str,
    value: Value,
    templates: &HashMap<String, String>,
) -> Result<RefEntry> {
    match value {
        Value::String(text) => match text.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => STANDARD.decode(encoded).map(RefEntry::Inline).map_err(|e| {
                RetrievalError::malformed(location, format!("invalid base64 in '{}': {}", key, e))
            }),
            None => Ok(RefEntry::Inline(text.into_bytes())),
        },
        // Some writers embed metadata as objects rather than JSON strings
        Value::Object(_) => Ok(RefEntry::Inline(value.to_string().into_bytes())),
        Value::Array(parts) => parse_pointer(location, key, &parts, templates),
        other => Err(RetrievalError::malformed(
            location,
            format!("reference '{}' has unsupported form {}", key, other),
        )),
    }
}

fn parse_pointer(
    location: &str,
    key: &str,
    parts: &[Value],
    templates: &HashMap<String, String>,
) -> Result<RefEntry> {
    let bad = |reason: &str| RetrievalError::malformed(location, format!("reference '{}' {}", key, reason));

    let url = match parts.first() {
        Some(Value::String(url)) => expand_templates(url, templates),
        _ => return Err(bad("must start with a url string")),
    };

    let range = match parts.len() {
        1 => None,
        3 => {
            let offset = parts[1].as_u64().ok_or_else(|| bad("has a non-integer offset"))?;
            let length = parts[2].as_u64().ok_or_else(|| bad("has a non-integer length"))?;
            Some(ByteRange { offset, length })
        }
        _ => return Err(bad("must be [url] or [url, offset, length]")),
    };

    Ok(RefEntry::Remote { url, range })
}

fn expand_templates(url: &str, templates: &HashMap<String, String>) -> String {
    if !url.contains("{{") {
        return url.to_string();
    }
    templates.iter().fold(url.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{{{}}}}}", name), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreClient;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_version_one_header() {
        let json = r#"{
            "version": 1,
            "templates": {"u": "s3://noaa-nwm-pds/nwm.20240101/short_range/chrtout.f001.nc"},
            "refs": {
                ".zgroup": "{\"zarr_format\": 2}",
                "streamflow/.zarray": {"zarr_format": 2, "shape": [3]},
                "streamflow/0": ["{{u}}", 1024, 12],
                "feature_id/0": "base64:AQAAAAAAAAA=",
                "whole": ["https://example.org/file.nc"]
            }
        }"#;

        let header = parse_header("mem://h1", json.as_bytes()).unwrap();

        assert_eq!(header.location(), "mem://h1");
        assert_eq!(header.version(), 1);
        assert_eq!(header.len(), 5);
        assert!(!header.is_empty());
        assert_eq!(
            header.get("streamflow/0"),
            Some(&RefEntry::Remote {
                url: "s3://noaa-nwm-pds/nwm.20240101/short_range/chrtout.f001.nc".to_string(),
                range: Some(ByteRange {
                    offset: 1024,
                    length: 12
                }),
            })
        );
        assert_eq!(
            header.get("feature_id/0"),
            Some(&RefEntry::Inline(vec![1, 0, 0, 0, 0, 0, 0, 0]))
        );
        assert_eq!(
            header.get("whole"),
            Some(&RefEntry::Remote {
                url: "https://example.org/file.nc".to_string(),
                range: None
            })
        );

        let zarray = header.metadata_json("streamflow/.zarray").unwrap().unwrap();
        assert_eq!(zarray["shape"][0], 3);
        assert!(header.metadata_json("missing/.zarray").unwrap().is_none());
    }

    #[test]
    fn test_parse_version_zero_header() {
        let json = r#"{".zgroup": "{\"zarr_format\": 2}", "time/0": ["data.nc", 0, 4]}"#;
        let header = parse_header("h0", json.as_bytes()).unwrap();

        assert_eq!(header.version(), 0);
        assert_eq!(header.len(), 2);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let result = parse_header("bad.json", b"{not json");
        match result.unwrap_err() {
            RetrievalError::MalformedHeader { location, .. } => assert_eq!(location, "bad.json"),
            other => panic!("Expected MalformedHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_problems_are_malformed() {
        for json in [
            r#"[1, 2, 3]"#,
            r#"{"version": 1, "refs": []}"#,
            r#"{"version": 1, "refs": {}}"#,
            r#"{"refs": {"a/0": ["url", 1]}}"#,
            r#"{"refs": {"a/0": [5, 0, 1]}}"#,
            r#"{"refs": {"a/0": ["url", "x", 1]}}"#,
            r#"{"refs": {"a/0": 42}}"#,
            r#"{"refs": {"a/0": "base64:!!!"}}"#,
        ] {
            let result = parse_header("h", json.as_bytes());
            assert!(
                matches!(result, Err(RetrievalError::MalformedHeader { .. })),
                "expected malformed for {}",
                json
            );
        }
    }

    #[test]
    fn test_unknown_version_is_unsupported() {
        let json = r#"{"version": 2, "refs": {"a": "b"}}"#;
        assert!(matches!(
            parse_header("h", json.as_bytes()),
            Err(RetrievalError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_remote_metadata_rejected() {
        let json = r#"{"refs": {"a/.zarray": ["meta.json"]}}"#;
        let header = parse_header("h", json.as_bytes()).unwrap();
        assert!(header.metadata_json("a/.zarray").is_err());
    }

    #[tokio::test]
    async fn test_fetch_header_from_local_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{"version": 1, "refs": {{"x/0": "abc"}}}}"#).unwrap();
        let location = temp_file.path().to_string_lossy().to_string();

        let header = fetch_header(&StoreClient::new(), &location).await.unwrap();
        assert_eq!(header.get("x/0"), Some(&RefEntry::Inline(b"abc".to_vec())));
    }

    #[tokio::test]
    async fn test_fetch_missing_header_is_unreachable() {
        let result = fetch_header(&StoreClient::new(), "/no/such/header.json").await;
        assert!(matches!(
            result,
            Err(RetrievalError::UnreachableSource { .. })
        ));
    }
}
