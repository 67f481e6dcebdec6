//! Feature and time selection on a resolved virtual dataset.
//!
//! Looks up the requested feature identifiers on the feature coordinate and
//! reads just the value chunks that contain them, along with the dataset's
//! decoded time coordinate.

use crate::config::VariableNames;
use crate::dataset::time::TimeUnits;
use crate::dataset::{VirtualArray, VirtualDataset};
use crate::error::{RetrievalError, Result};
use crate::models::{ExtractionResult, FeatureId, Timestamp};
use crate::store::ByteSource;

use std::collections::HashMap;
use tracing::debug;

/// Selects values and timestamps from a virtual dataset
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor<'a> {
    source: &'a dyn ByteSource,
    variables: &'a VariableNames,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(source: &'a dyn ByteSource, variables: &'a VariableNames) -> Self {
        Self { source, variables }
    }

    /// Values and timestamps for `feature_ids`, all or nothing
    pub async fn extract(&self, view: &VirtualDataset, feature_ids: &[FeatureId]) -> Result<ExtractionResult> {
        let timestamps = self.select_time(view).await?;
        let values = self.select_values(view, feature_ids).await?;

        if let Some(bad) = values.iter().find(|series| series.len() != timestamps.len()) {
            return Err(RetrievalError::InconsistentResultShape {
                location: view.location().to_string(),
                reason: format!(
                    "{} values per feature for {} timestamps",
                    bad.len(),
                    timestamps.len()
                ),
            });
        }

        Ok(ExtractionResult::new(view.location(), values, timestamps))
    }

    /// Values of the configured variable for exactly `feature_ids`, in order.
    /// Each inner vector holds one value per time step.
    pub async fn select_values(&self, view: &VirtualDataset, feature_ids: &[FeatureId]) -> Result<Vec<Vec<f64>>> {
        let location = view.location();
        let names = self.variables;
        let variable = require_variable(view, &names.value_variable)?;

        let feature_axis = variable.axis(&names.feature_dimension).ok_or_else(|| {
            RetrievalError::unsupported(
                location,
                format!(
                    "variable '{}' is not indexed by '{}'",
                    names.value_variable, names.feature_dimension
                ),
            )
        })?;
        let time_axis = variable.axis(&names.time_dimension);

        for (axis, (dimension, length)) in variable.dimensions().iter().zip(variable.shape()).enumerate() {
            if axis != feature_axis && Some(axis) != time_axis && *length != 1 {
                return Err(RetrievalError::unsupported(
                    location,
                    format!(
                        "variable '{}' has extra dimension '{}' of length {}",
                        names.value_variable, dimension, length
                    ),
                ));
            }
        }

        let positions = self.feature_positions(view, feature_ids).await?;
        let steps = time_axis.map_or(1, |axis| variable.shape()[axis]);
        if steps == 0 {
            return Ok(vec![Vec::new(); positions.len()]);
        }

        let mut points = Vec::with_capacity(positions.len() * steps);
        for position in &positions {
            for step in 0..steps {
                let mut point = vec![0; variable.shape().len()];
                point[feature_axis] = *position;
                if let Some(axis) = time_axis {
                    point[axis] = step;
                }
                points.push(point);
            }
        }

        let flat = variable.read_points(self.source, &points).await?;
        debug!(
            "Selected {} features x {} steps from {}",
            positions.len(),
            steps,
            location
        );

        Ok(flat.chunks(steps).map(<[f64]>::to_vec).collect())
    }

    /// Decoded time coordinate of the view
    pub async fn select_time(&self, view: &VirtualDataset) -> Result<Vec<Timestamp>> {
        let location = view.location();
        let time = require_variable(view, &self.variables.time_dimension)?;

        let units_text = time.attributes().units.as_deref().ok_or_else(|| {
            RetrievalError::malformed(
                location,
                format!("time coordinate '{}' has no units", time.name()),
            )
        })?;
        let units = TimeUnits::parse(units_text).map_err(|reason| RetrievalError::malformed(location, reason))?;

        let raw = time.read_all_f64(self.source).await?;
        if raw.is_empty() {
            return Err(RetrievalError::EmptyTimeAxis {
                location: location.to_string(),
            });
        }

        raw.into_iter()
            .enumerate()
            .map(|(idx, value)| {
                value.and_then(|v| units.decode(v)).ok_or_else(|| {
                    RetrievalError::malformed(location, format!("time value at index {} cannot be decoded", idx))
                })
            })
            .collect()
    }

    /// Index of every requested feature on the feature coordinate
    async fn feature_positions(&self, view: &VirtualDataset, feature_ids: &[FeatureId]) -> Result<Vec<usize>> {
        let coordinate = require_variable(view, &self.variables.feature_dimension)?;
        let known = coordinate.read_all_i64(self.source).await?;

        let mut index: HashMap<FeatureId, usize> = HashMap::with_capacity(known.len());
        for (position, id) in known.into_iter().enumerate() {
            index.entry(id).or_insert(position);
        }

        feature_ids
            .iter()
            .map(|id| {
                index.get(id).copied().ok_or_else(|| RetrievalError::FeatureNotFound {
                    location: view.location().to_string(),
                    feature_id: *id,
                })
            })
            .collect()
    }
}

fn require_variable<'v>(view: &'v VirtualDataset, name: &str) -> Result<&'v VirtualArray> {
    view.variable(name).ok_or_else(|| {
        RetrievalError::malformed(view.location(), format!("variable '{}' not found", name))
    })
}
