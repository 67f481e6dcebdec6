//! Integration tests retrieving series from reference headers on disk

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{TimeZone, Utc};
use flate2::{Compression, write::ZlibEncoder};
use nwm_streamflow::{RetrievalConfig, RetrievalError, SeriesRetriever, Timestamp};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn valid_time(hour: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2023, 6, 1, hour, 0, 0).unwrap()
}

fn inline(bytes: &[u8]) -> String {
    format!("base64:{}", STANDARD.encode(bytes))
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Write a one-step NWM-like header whose streamflow is stored as scaled,
/// zlib compressed `<i4` in a separate payload file. Returns the header path.
fn write_header(dir: &Path, name: &str, hour: u32, features: &[i64], flows: &[i32]) -> String {
    let payload_path = dir.join(format!("{}.nc", name));
    let raw: Vec<u8> = flows.iter().flat_map(|v| v.to_le_bytes()).collect();
    let compressed = zlib(&raw);
    std::fs::write(&payload_path, &compressed).unwrap();

    let ids: Vec<u8> = features.iter().flat_map(|id| id.to_le_bytes()).collect();
    let minutes = (valid_time(hour).timestamp() / 60) as i32;

    let streamflow_zarray = json!({
        "zarr_format": 2, "shape": [1, features.len()], "chunks": [1, features.len()],
        "dtype": "<i4", "compressor": {"id": "zlib", "level": 6}, "filters": null,
        "order": "C", "fill_value": -999900
    });
    let streamflow_zattrs = json!({
        "_ARRAY_DIMENSIONS": ["time", "feature_id"],
        "scale_factor": 0.5, "add_offset": 0.0, "units": "m3 s-1"
    });
    let feature_zarray = json!({
        "zarr_format": 2, "shape": [features.len()], "chunks": [features.len()],
        "dtype": "<i8", "compressor": null, "filters": null, "order": "C", "fill_value": null
    });
    let time_zarray = json!({
        "zarr_format": 2, "shape": [1], "chunks": [1],
        "dtype": "<i4", "compressor": null, "filters": null, "order": "C", "fill_value": null
    });

    let header = json!({
        "version": 1,
        "templates": {"u": payload_path.to_string_lossy()},
        "refs": {
            ".zgroup": "{\"zarr_format\": 2}",
            "streamflow/.zarray": streamflow_zarray.to_string(),
            "streamflow/.zattrs": streamflow_zattrs.to_string(),
            "streamflow/0.0": ["{{u}}", 0, compressed.len()],
            "feature_id/.zarray": feature_zarray.to_string(),
            "feature_id/.zattrs": "{\"_ARRAY_DIMENSIONS\": [\"feature_id\"]}",
            "feature_id/0": inline(&ids),
            "time/.zarray": time_zarray.to_string(),
            "time/.zattrs": "{\"_ARRAY_DIMENSIONS\": [\"time\"], \"units\": \"minutes since 1970-01-01 00:00:00\"}",
            "time/0": inline(&minutes.to_le_bytes()),
        }
    });

    let header_path = dir.join(format!("{}.json", name));
    std::fs::write(&header_path, header.to_string()).unwrap();
    header_path.to_string_lossy().into_owned()
}

fn quiet_retriever(workers: usize) -> SeriesRetriever {
    SeriesRetriever::new(RetrievalConfig::default().with_workers(workers).quiet())
}

#[tokio::test]
async fn test_three_headers_assembled_in_time_order() {
    let temp_dir = TempDir::new().unwrap();
    let features = [101, 202, 303];
    let locations = vec![
        write_header(temp_dir.path(), "t03", 3, &features, &[6, 60, 600]),
        write_header(temp_dir.path(), "t01", 1, &features, &[2, 20, 200]),
        write_header(temp_dir.path(), "t02", 2, &features, &[4, 40, 400]),
    ];

    let outcome = quiet_retriever(3).retrieve(&locations, &[303, 101]).await.unwrap();

    assert_eq!(
        outcome.series.timestamps,
        vec![valid_time(1), valid_time(2), valid_time(3)]
    );
    assert_eq!(outcome.series.get(101), Some(&[1.0, 2.0, 3.0][..]));
    assert_eq!(outcome.series.get(303), Some(&[100.0, 200.0, 300.0][..]));
    assert_eq!(outcome.stats.timesteps, 3);
}

#[tokio::test]
async fn test_unknown_feature_fails_with_location() {
    let temp_dir = TempDir::new().unwrap();
    let locations = vec![
        write_header(temp_dir.path(), "a", 1, &[101, 202], &[2, 4]),
        write_header(temp_dir.path(), "b", 2, &[101, 202], &[2, 4]),
    ];

    let err = quiet_retriever(2).retrieve(&locations, &[101, 999]).await.unwrap_err();

    match &err {
        RetrievalError::FeatureNotFound { feature_id, .. } => assert_eq!(*feature_id, 999),
        other => panic!("Expected FeatureNotFound, got {:?}", other),
    }
    assert!(locations.iter().any(|l| Some(l.as_str()) == err.location()));
}

#[tokio::test]
async fn test_missing_header_file_aborts_batch() {
    let temp_dir = TempDir::new().unwrap();
    let mut locations: Vec<String> = (1..=4)
        .map(|h| write_header(temp_dir.path(), &format!("h{}", h), h, &[7], &[2]))
        .collect();
    let missing = temp_dir.path().join("absent.json").to_string_lossy().into_owned();
    locations.insert(1, missing.clone());

    let err = quiet_retriever(2).retrieve(&locations, &[7]).await.unwrap_err();

    assert!(matches!(err, RetrievalError::UnreachableSource { .. }));
    assert_eq!(err.location(), Some(missing.as_str()));
}

#[tokio::test]
async fn test_output_written_to_parquet() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("out").join("series.parquet");
    let locations = vec![
        write_header(temp_dir.path(), "x", 5, &[1, 2], &[10, 20]),
        write_header(temp_dir.path(), "y", 4, &[1, 2], &[30, 40]),
    ];

    let config = RetrievalConfig::default().with_output(output.clone()).quiet();
    let outcome = SeriesRetriever::new(config).retrieve(&locations, &[2]).await.unwrap();

    assert_eq!(outcome.series.get(2), Some(&[20.0, 10.0][..]));
    assert_eq!(outcome.stats.rows_written, 2);
    assert!(output.exists());
}
