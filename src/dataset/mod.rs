//! Virtual dataset resolution.
//!
//! Turns a decoded reference header into a set of named, lazily read arrays
//! sharing named dimensions. Resolution is a pure function of the header:
//! no chunk payload is read until a selection is made on one of the arrays.

pub mod array;
pub mod codec;
pub mod time;

pub use array::{ValueAttributes, VirtualArray};

use crate::constants::{ZARRAY_SUFFIX, ZATTRS_SUFFIX};
use crate::error::{RetrievalError, Result};
use crate::header::{Header, RefEntry};

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Lazy, dimension-indexed view over the arrays described by one header
#[derive(Debug, Clone)]
pub struct VirtualDataset {
    location: String,
    arrays: HashMap<String, VirtualArray>,
    dimensions: BTreeMap<String, usize>,
}

impl VirtualDataset {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn variable(&self, name: &str) -> Option<&VirtualArray> {
        self.arrays.get(name)
    }

    /// Variable names in sorted order
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.arrays.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Length of every named dimension
    pub fn dimensions(&self) -> &BTreeMap<String, usize> {
        &self.dimensions
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions.get(name).copied()
    }
}

/// Build the virtual dataset for a header without reading any payload
pub fn resolve(header: &Header) -> Result<VirtualDataset> {
    let location = header.location();

    let mut variables: Vec<&str> = header
        .keys()
        .filter_map(|key| key.strip_suffix(ZARRAY_SUFFIX)?.strip_suffix('/'))
        .filter(|prefix| !prefix.is_empty())
        .collect();
    variables.sort_unstable();

    if let Some(nested) = variables.iter().find(|name| name.contains('/')) {
        return Err(RetrievalError::unsupported(
            location,
            format!("nested group array '{}' is not supported", nested),
        ));
    }

    // With flat variable names the first path segment names the variable;
    // the remainder is a chunk key using either separator
    let mut chunk_keys: HashMap<&str, Vec<(&str, &RefEntry)>> = HashMap::new();
    for key in header.keys() {
        let Some((prefix, suffix)) = key.split_once('/') else {
            continue;
        };
        if suffix == ZARRAY_SUFFIX || suffix == ZATTRS_SUFFIX || variables.binary_search(&prefix).is_err() {
            continue;
        }
        if let Some(entry) = header.get(key) {
            chunk_keys.entry(prefix).or_default().push((suffix, entry));
        }
    }

    if variables.is_empty() {
        return Err(RetrievalError::malformed(location, "header declares no arrays"));
    }

    let mut arrays = HashMap::with_capacity(variables.len());
    let mut dimensions: BTreeMap<String, usize> = BTreeMap::new();
    for name in variables {
        let zarray = header
            .metadata_json(&format!("{}/{}", name, ZARRAY_SUFFIX))?
            .ok_or_else(|| RetrievalError::malformed(location, format!("missing .zarray for '{}'", name)))?;
        let zattrs = header.metadata_json(&format!("{}/{}", name, ZATTRS_SUFFIX))?;
        let refs = chunk_keys.remove(name).unwrap_or_default();

        let array = VirtualArray::from_metadata(location, name, zarray, zattrs, refs)?;

        for (dimension, length) in array.dimensions().iter().zip(array.shape()) {
            match dimensions.get(dimension) {
                Some(existing) if existing != length => {
                    return Err(RetrievalError::malformed(
                        location,
                        format!(
                            "dimension '{}' has length {} in '{}' but {} elsewhere",
                            dimension, length, name, existing
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    dimensions.insert(dimension.clone(), *length);
                }
            }
        }

        arrays.insert(name.to_string(), array);
    }

    debug!(
        "Resolved {} arrays over dimensions {:?} for {}",
        arrays.len(),
        dimensions,
        location
    );

    Ok(VirtualDataset {
        location: location.to_string(),
        arrays,
        dimensions,
    })
}
