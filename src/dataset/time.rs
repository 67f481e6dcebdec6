//! CF time coordinate decoding (`<unit> since <reference>`).

use crate::models::Timestamp;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Parsed `units` attribute of a time coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    seconds_per_unit: f64,
    epoch: Timestamp,
}

fn units_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z]+)\s+since\s+(.+?)\s*$").expect("time units pattern is valid")
    })
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self, String> {
        let captures = units_pattern()
            .captures(units)
            .ok_or_else(|| format!("time units '{}' are not of the form '<unit> since <date>'", units))?;

        let seconds_per_unit = match captures[1].to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "days" | "day" | "d" => 86_400.0,
            other => return Err(format!("unsupported time unit '{}'", other)),
        };

        let epoch = parse_reference(&captures[2])
            .ok_or_else(|| format!("unparseable reference date '{}'", &captures[2]))?;

        Ok(Self {
            seconds_per_unit,
            epoch,
        })
    }

    /// Convert a raw coordinate value to a UTC timestamp (millisecond precision)
    pub fn decode(&self, value: f64) -> Option<Timestamp> {
        if !value.is_finite() {
            return None;
        }
        let millis = (value * self.seconds_per_unit * 1_000.0).round();
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        self.epoch.checked_add_signed(Duration::milliseconds(millis as i64))
    }
}

fn parse_reference(text: &str) -> Option<Timestamp> {
    let trimmed = text
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text.trim()) {
        return Some(with_offset.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
