//! Bounded concurrent fan-out of per-location processing
//!
//! Every location runs through the single-location pipeline with at most
//! `worker_count` in flight. Results are gathered in completion order; the
//! first failure aborts the batch and drops whatever is still running.

use super::process_location;
use crate::config::VariableNames;
use crate::error::Result;
use crate::models::{ExtractionResult, FeatureId};
use crate::store::ByteSource;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::{debug, error};

/// Fans the single-location pipeline out over a batch of headers
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    source: Arc<dyn ByteSource>,
    variables: VariableNames,
    show_progress: bool,
}

impl ParallelDispatcher {
    pub fn new(source: Arc<dyn ByteSource>, variables: VariableNames) -> Self {
        Self {
            source,
            variables,
            show_progress: false,
        }
    }

    /// Show an indicatif progress bar while dispatching
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Process every location with at most `worker_count` running at once.
    ///
    /// Returns results in completion order, or the first error encountered.
    pub async fn dispatch(
        &self,
        locations: &[String],
        feature_ids: &[FeatureId],
        worker_count: usize,
    ) -> Result<Vec<ExtractionResult>> {
        let workers = worker_count.max(1);
        let pb = self.progress_bar(locations.len());
        debug!(
            "Dispatching {} locations across {} workers",
            locations.len(),
            workers
        );

        let source = self.source.as_ref();
        let variables = &self.variables;
        let mut pending = stream::iter(locations)
            .map(|location| {
                let pb = pb.clone();
                async move {
                    let result = process_location(source, location, feature_ids, variables).await;
                    pb.inc(1);
                    result
                }
            })
            .buffer_unordered(workers);

        let mut results = Vec::with_capacity(locations.len());
        while let Some(result) = pending.next().await {
            match result {
                Ok(extraction) => {
                    debug!("Completed {}", extraction.location);
                    results.push(extraction);
                }
                Err(e) => {
                    error!(
                        "Aborting batch: {} failed: {}",
                        e.location().unwrap_or("<unknown>"),
                        e
                    );
                    pb.abandon_with_message("Retrieval failed");
                    return Err(e);
                }
            }
        }

        pb.finish_with_message("All headers processed");
        Ok(results)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || len == 0 {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("Fetching headers");
        pb
    }
}
