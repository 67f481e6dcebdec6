//! Retrieval engine.
//!
//! Runs the single-location pipeline (fetch header, resolve, extract) for
//! every location in a batch, assembles the results into time-ordered
//! per-feature series and optionally writes them out.

pub mod assemble;
pub mod dispatch;
pub mod writer;

#[cfg(test)]
pub mod tests;

use self::{assemble::assemble, dispatch::ParallelDispatcher, writer::SeriesWriter};

use crate::config::{RetrievalConfig, SystemProfile, VariableNames, resolve_worker_count};
use crate::dataset::resolve;
use crate::error::{RetrievalError, Result};
use crate::extract::FeatureExtractor;
use crate::header::fetch_header;
use crate::models::{AssembledSeries, ExtractionResult, FeatureId, RetrievalStats};
use crate::store::{ByteSource, StoreClient};

use colored::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Fetch, resolve and extract `feature_ids` from the header at `location`.
///
/// Either every requested feature is returned or an error naming the
/// location is.
pub async fn process_location(
    source: &dyn ByteSource,
    location: &str,
    feature_ids: &[FeatureId],
    variables: &VariableNames,
) -> Result<ExtractionResult> {
    let header = fetch_header(source, location).await?;
    let view = resolve(&header)?;
    FeatureExtractor::new(source, variables)
        .extract(&view, feature_ids)
        .await
}

/// Series and statistics from one retrieval run
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub series: AssembledSeries,
    pub stats: RetrievalStats,
}

/// Batch retrieval of streamflow series from reference headers
#[derive(Debug, Clone)]
pub struct SeriesRetriever {
    source: Arc<dyn ByteSource>,
    config: RetrievalConfig,
    system_profile: SystemProfile,
}

impl Default for SeriesRetriever {
    fn default() -> Self {
        Self::new(RetrievalConfig::default())
    }
}

impl SeriesRetriever {
    /// Retriever reading through a default [`StoreClient`]
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            source: Arc::new(StoreClient::new()),
            config,
            system_profile: SystemProfile::detect(),
        }
    }

    /// Read headers and chunks through a different byte source
    pub fn with_source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = source;
        self
    }

    /// Size workers from a fixed profile instead of the host
    pub fn with_system_profile(mut self, profile: SystemProfile) -> Self {
        self.system_profile = profile;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve `feature_ids` from every location and assemble the series.
    ///
    /// Any single failure fails the whole run; no partial series is returned.
    pub async fn retrieve(&self, locations: &[String], feature_ids: &[FeatureId]) -> Result<RetrievalOutcome> {
        let start_time = Instant::now();
        validate_request(locations, feature_ids)?;

        let workers = resolve_worker_count(self.config.workers, &self.system_profile, locations.len());
        info!(
            "Retrieving {} features from {} headers with {} workers",
            feature_ids.len(),
            locations.len(),
            workers
        );

        if self.config.print_summary {
            println!("{}", "Starting streamflow retrieval".bright_green().bold());
            println!(
                "  {} {}",
                "Headers:".bright_cyan(),
                locations.len().to_string().bright_white()
            );
            println!(
                "  {} {}",
                "Features:".bright_cyan(),
                feature_ids.len().to_string().bright_white()
            );
            println!(
                "  {} {}",
                "Workers:".bright_cyan(),
                workers.to_string().bright_white()
            );
        }

        let dispatcher = ParallelDispatcher::new(self.source.clone(), self.config.variables.clone())
            .with_progress(self.config.show_progress);
        let results = dispatcher.dispatch(locations, feature_ids, workers).await?;
        let series = assemble(results, feature_ids)?;

        let mut stats = RetrievalStats {
            locations_processed: locations.len(),
            features: series.feature_ids.len(),
            timesteps: series.len(),
            workers,
            ..Default::default()
        };

        if let (Some(path), Some(format)) = (&self.config.output_path, self.config.effective_output_format()) {
            let writer = SeriesWriter::new(path.clone(), format);
            stats.rows_written = writer.write(&series)?;
            stats.output_path = Some(path.clone());
        }

        stats.processing_time_ms = start_time.elapsed().as_millis();
        debug!("Retrieval finished: {:?}", stats);

        if self.config.print_summary {
            print_summary(&stats);
        }

        Ok(RetrievalOutcome { series, stats })
    }
}

fn validate_request(locations: &[String], feature_ids: &[FeatureId]) -> Result<()> {
    if locations.is_empty() {
        return Err(RetrievalError::configuration("no header locations given"));
    }
    if let Some(blank) = locations.iter().position(|l| l.trim().is_empty()) {
        return Err(RetrievalError::configuration(format!(
            "header location {} is empty",
            blank + 1
        )));
    }
    if feature_ids.is_empty() {
        return Err(RetrievalError::configuration("no feature identifiers given"));
    }

    let mut seen = HashSet::with_capacity(feature_ids.len());
    if let Some(duplicate) = feature_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(RetrievalError::configuration(format!(
            "feature {} requested more than once",
            duplicate
        )));
    }

    Ok(())
}

fn print_summary(stats: &RetrievalStats) {
    println!("\n{}", "Retrieval Summary".bright_green().bold());
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        stats.processing_time_ms.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Headers processed:".bright_cyan(),
        stats.locations_processed.to_string().bright_white()
    );
    println!(
        "  {} {} x {}",
        "Series:".bright_cyan(),
        stats.features.to_string().bright_white().bold(),
        stats.timesteps.to_string().bright_white().bold()
    );
    if let Some(path) = &stats.output_path {
        println!(
            "  {} {} ({} rows)",
            "Output:".bright_cyan(),
            path.display(),
            stats.rows_written.to_string().bright_white()
        );
    }
}
