//! Command-line interface components.

use crate::config::{OutputFormat, RetrievalConfig};
use crate::models::{FeatureId, RetrievalStats};
use crate::processor::SeriesRetriever;
use crate::processor::writer::to_dataframe;

use anyhow::{Context, Result, bail};
use clap::Parser;
use polars::prelude::{CsvWriter, SerWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "nwm-streamflow")]
#[command(about = "Retrieve NWM streamflow time series from kerchunk reference headers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Header locations (local paths, file://, http(s)://, s3:// or gs:// urls)
    #[arg(value_name = "LOCATION")]
    pub locations: Vec<String>,

    /// File listing header locations, one per line
    #[arg(short = 'l', long, value_name = "PATH")]
    pub locations_file: Option<PathBuf>,

    /// Feature identifiers to extract, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub feature_ids: Vec<FeatureId>,

    /// Number of concurrent workers (default: sized from CPU cores and memory)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Variable holding the values to extract
    #[arg(long, default_value = crate::constants::DEFAULT_VALUE_VARIABLE)]
    pub variable: String,

    /// Feature dimension name
    #[arg(long, default_value = crate::constants::DEFAULT_FEATURE_DIMENSION)]
    pub feature_dim: String,

    /// Time dimension name
    #[arg(long, default_value = crate::constants::DEFAULT_TIME_DIMENSION)]
    pub time_dim: String,

    /// Write the series to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (csv, parquet); inferred from the output extension if omitted
    #[arg(long, value_parser = parse_output_format)]
    pub format: Option<OutputFormat>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log warnings and errors, no summary
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.no_progress && !self.quiet
    }

    /// Positional locations followed by those from the locations file
    pub fn all_locations(&self) -> Result<Vec<String>> {
        let mut locations = self.locations.clone();
        if let Some(path) = &self.locations_file {
            locations.extend(read_location_list(path)?);
        }
        if locations.is_empty() {
            bail!("No header locations given; pass them as arguments or with --locations-file");
        }
        Ok(locations)
    }

    pub fn to_config(&self) -> RetrievalConfig {
        let mut config = RetrievalConfig::default()
            .with_value_variable(&self.variable)
            .with_feature_dimension(&self.feature_dim)
            .with_time_dimension(&self.time_dim);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(path) = &self.output {
            config = config.with_output(path.clone());
        }
        if let Some(format) = self.format {
            config = config.with_output_format(format);
        }
        if self.quiet {
            config = config.quiet();
        }
        config.show_progress = self.show_progress();
        // Stdout carries the CSV when no output file is given
        config.print_summary = config.print_summary && self.output.is_some();
        config
    }
}

fn parse_output_format(name: &str) -> std::result::Result<OutputFormat, String> {
    OutputFormat::parse(name).ok_or_else(|| format!("unknown format '{}' (expected csv or parquet)", name))
}

/// Read a plain-text location list: trimmed lines, skipping blanks and `#` comments
pub fn read_location_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read locations file {}", path.display()))?;
    Ok(parse_location_list(&text))
}

fn parse_location_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Set up structured logging based on CLI arguments
pub fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nwm_streamflow={}", log_level)));

    if args.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
            .context("Failed to initialise logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("Failed to initialise logging")?;
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Main command runner: retrieve the series and write or print it
pub async fn run(args: Args) -> Result<RetrievalStats> {
    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    let locations = args.all_locations()?;
    let config = args.to_config();
    info!(
        "Retrieving features {:?} from {} headers",
        args.feature_ids,
        locations.len()
    );

    let outcome = SeriesRetriever::new(config)
        .retrieve(&locations, &args.feature_ids)
        .await
        .context("Streamflow retrieval failed")?;

    if args.output.is_none() {
        let mut df = to_dataframe(&outcome.series)?;
        CsvWriter::new(std::io::stdout().lock())
            .include_header(true)
            .finish(&mut df)
            .context("Failed to write series to stdout")?;
    }

    Ok(outcome.stats)
}
