//! Time-ordered merge of per-location extraction results
//!
//! Each result is a sorted run of one or more timesteps. Runs are merged by
//! timestamp with a stable sort, so equal timestamps keep completion order
//! and then their order inside the run. For the usual one-step headers this
//! is exactly "sort by first timestamp, then concatenate".

use crate::error::{RetrievalError, Result};
use crate::models::{AssembledSeries, ExtractionResult, FeatureId};

use tracing::debug;

/// Merge gathered results into one series per requested feature
pub fn assemble(results: Vec<ExtractionResult>, feature_ids: &[FeatureId]) -> Result<AssembledSeries> {
    for result in &results {
        validate_shape(result, feature_ids.len())?;
    }

    // (result index, step index) for every timestep, ordered by time
    let mut rows: Vec<(usize, usize)> = results
        .iter()
        .enumerate()
        .flat_map(|(r, result)| (0..result.timestamps.len()).map(move |s| (r, s)))
        .collect();
    rows.sort_by_key(|&(r, s)| results[r].timestamps[s]);

    let timestamps = rows.iter().map(|&(r, s)| results[r].timestamps[s]).collect();
    let values = (0..feature_ids.len())
        .map(|f| rows.iter().map(|&(r, s)| results[r].values[f][s]).collect())
        .collect();

    debug!(
        "Assembled {} timesteps for {} features from {} results",
        rows.len(),
        feature_ids.len(),
        results.len()
    );

    Ok(AssembledSeries {
        feature_ids: feature_ids.to_vec(),
        timestamps,
        values,
    })
}

fn validate_shape(result: &ExtractionResult, feature_count: usize) -> Result<()> {
    if result.timestamps.is_empty() {
        return Err(RetrievalError::EmptyTimeAxis {
            location: result.location.clone(),
        });
    }

    if result.values.len() != feature_count {
        return Err(RetrievalError::InconsistentResultShape {
            location: result.location.clone(),
            reason: format!(
                "{} features recorded, {} requested",
                result.values.len(),
                feature_count
            ),
        });
    }

    if let Some(series) = result.values.iter().find(|v| v.len() != result.timestamps.len()) {
        return Err(RetrievalError::InconsistentResultShape {
            location: result.location.clone(),
            reason: format!(
                "{} values for {} timestamps",
                series.len(),
                result.timestamps.len()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::fixtures::hour;

    fn single(location: &str, h: i64, values: &[f64]) -> ExtractionResult {
        ExtractionResult::new(
            location,
            values.iter().map(|v| vec![*v]).collect(),
            vec![hour(h)],
        )
    }

    #[test]
    fn test_out_of_order_results_are_time_sorted() {
        let results = vec![
            single("c", 2, &[1.2, 2.2]),
            single("a", 0, &[1.0, 2.0]),
            single("b", 1, &[1.1, 2.1]),
        ];

        let series = assemble(results, &[10, 20]).unwrap();

        assert_eq!(series.timestamps, vec![hour(0), hour(1), hour(2)]);
        assert_eq!(series.get(10), Some(&[1.0, 1.1, 1.2][..]));
        assert_eq!(series.get(20), Some(&[2.0, 2.1, 2.2][..]));
        assert_eq!(series.get(30), None);
    }

    #[test]
    fn test_sorted_and_reversed_input_agree() {
        let sorted: Vec<ExtractionResult> = (0..6)
            .map(|h| single(&format!("h{}", h), h, &[h as f64, -(h as f64)]))
            .collect();
        let mut reversed = sorted.clone();
        reversed.reverse();

        let forward = assemble(sorted, &[1, 2]).unwrap();
        let backward = assemble(reversed, &[1, 2]).unwrap();

        assert_eq!(forward, backward);
        assert!(forward.timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_multi_step_runs_are_interleaved() {
        let first = ExtractionResult::new("a", vec![vec![1.0, 3.0]], vec![hour(1), hour(3)]);
        let second = ExtractionResult::new("b", vec![vec![2.0, 4.0]], vec![hour(2), hour(4)]);

        let series = assemble(vec![second, first], &[7]).unwrap();

        assert_eq!(series.timestamps, vec![hour(1), hour(2), hour(3), hour(4)]);
        assert_eq!(series.get(7), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    }

    #[test]
    fn test_ties_keep_completion_order() {
        let results = vec![single("first", 5, &[1.0]), single("second", 5, &[2.0])];
        let series = assemble(results, &[1]).unwrap();
        assert_eq!(series.get(1), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let results = vec![single("a", 0, &[1.0, 2.0]), single("b", 1, &[1.0])];
        match assemble(results, &[10, 20]).unwrap_err() {
            RetrievalError::InconsistentResultShape { location, .. } => assert_eq!(location, "b"),
            other => panic!("Expected InconsistentResultShape, got {:?}", other),
        }
    }

    #[test]
    fn test_value_count_mismatch() {
        let result = ExtractionResult::new("a", vec![vec![1.0, 2.0]], vec![hour(0)]);
        assert!(matches!(
            assemble(vec![result], &[10]),
            Err(RetrievalError::InconsistentResultShape { .. })
        ));
    }

    #[test]
    fn test_empty_timestamps_rejected() {
        let result = ExtractionResult::new("a", vec![vec![]], vec![]);
        assert!(matches!(
            assemble(vec![result], &[10]),
            Err(RetrievalError::EmptyTimeAxis { .. })
        ));
    }

    #[test]
    fn test_no_results() {
        let series = assemble(Vec::new(), &[10]).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.get(10), Some(&[][..]));
    }
}
