//! Output writing for assembled series
//!
//! Lays an assembled series out as a wide table, a `time` column followed by
//! one `f64` column per feature named after its identifier, and writes it as
//! CSV or Snappy compressed Parquet.

use crate::config::OutputFormat;
use crate::error::{RetrievalError, Result};
use crate::models::AssembledSeries;

use polars::prelude::{
    Column, CsvWriter, DataFrame, DataType, ParquetWriter, SerWriter, TimeUnit,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the timestamp column
pub const TIME_COLUMN: &str = "time";

/// Writes assembled series to a single output file
#[derive(Debug, Clone)]
pub struct SeriesWriter {
    output_path: PathBuf,
    format: OutputFormat,
}

impl SeriesWriter {
    pub fn new(output_path: PathBuf, format: OutputFormat) -> Self {
        Self { output_path, format }
    }

    /// Writer whose format follows the path extension
    pub fn for_path(output_path: PathBuf) -> Self {
        let format = OutputFormat::from_path(&output_path);
        Self::new(output_path, format)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write the series, returning the number of rows written
    pub fn write(&self, series: &AssembledSeries) -> Result<usize> {
        let mut df = to_dataframe(series).map_err(|e| self.output_error(e))?;

        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.output_error(e))?;
        }
        let file = File::create(&self.output_path).map_err(|e| self.output_error(e))?;

        debug!(
            "Writing {} rows x {} columns to {} as {:?}",
            df.height(),
            df.width(),
            self.output_path.display(),
            self.format
        );

        match self.format {
            OutputFormat::Csv => {
                CsvWriter::new(file)
                    .include_header(true)
                    .finish(&mut df)
                    .map_err(|e| self.output_error(e))?;
            }
            OutputFormat::Parquet => {
                ParquetWriter::new(file)
                    .with_compression(self.format.parquet_compression())
                    .finish(&mut df)
                    .map_err(|e| self.output_error(e))?;
            }
        }

        info!("Wrote {} rows to {}", df.height(), self.output_path.display());
        Ok(df.height())
    }

    fn output_error(&self, reason: impl ToString) -> RetrievalError {
        RetrievalError::Output {
            path: self.output_path.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Wide table for `series`: millisecond datetimes plus one column per feature
pub fn to_dataframe(series: &AssembledSeries) -> Result<DataFrame> {
    let millis: Vec<i64> = series.timestamps.iter().map(|t| t.timestamp_millis()).collect();
    let time = Column::new(TIME_COLUMN.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    let mut columns = Vec::with_capacity(series.feature_ids.len() + 1);
    columns.push(time);
    for (feature_id, values) in series.iter() {
        columns.push(Column::new(feature_id.to_string().into(), values));
    }

    Ok(DataFrame::new(columns)?)
}
