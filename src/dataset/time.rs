//! Numeric to calendar time conversion.
//!
//! Indexing variables carry a `units` attribute of the form
//! `"<unit> since <epoch>"` (the CF convention). [`TimeUnits`]
//! parses that attribute and converts between numeric offsets and
//! calendar instants.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn parse(word: &str) -> Option<TimeUnit> {
        match word.trim().to_ascii_lowercase().as_str() {
            "microsecond" | "microseconds" | "us" => Some(TimeUnit::Microseconds),
            "millisecond" | "milliseconds" | "ms" => Some(TimeUnit::Milliseconds),
            "second" | "seconds" | "sec" | "secs" | "s" => Some(TimeUnit::Seconds),
            "minute" | "minutes" | "min" | "mins" => Some(TimeUnit::Minutes),
            "hour" | "hours" | "hr" | "hrs" | "h" => Some(TimeUnit::Hours),
            "day" | "days" | "d" => Some(TimeUnit::Days),
            _ => None,
        }
    }

    fn microseconds(self) -> f64 {
        match self {
            TimeUnit::Microseconds => 1.0,
            TimeUnit::Milliseconds => 1e3,
            TimeUnit::Seconds => 1e6,
            TimeUnit::Minutes => 60.0 * 1e6,
            TimeUnit::Hours => 3_600.0 * 1e6,
            TimeUnit::Days => 86_400.0 * 1e6,
        }
    }
}

/// A parsed `units` attribute: a unit and the epoch it counts from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl TimeUnits {
    /// Parse `"<unit> since <epoch>"`. The epoch accepts dates with an
    /// optional time portion, `T` or space separated, with optional
    /// fractional seconds and an optional trailing `Z` or `UTC`.
    pub fn parse(units: &str) -> Result<TimeUnits> {
        let mut parts = units.splitn(2, " since ");
        let unit_word = parts.next().unwrap_or("");
        let epoch_text = parts
            .next()
            .ok_or_else(|| Error::Dataset(format!("units not of form '<unit> since <epoch>': {:?}", units)))?;
        let unit = TimeUnit::parse(unit_word)
            .ok_or_else(|| Error::Dataset(format!("unrecognized time unit: {:?}", unit_word)))?;
        let epoch = parse_epoch(epoch_text)?;
        Ok(TimeUnits { unit, epoch })
    }

    /// Numeric offset -> calendar instant.
    pub fn num_to_date(&self, value: f64) -> NaiveDateTime {
        self.epoch + Duration::microseconds((value * self.unit.microseconds()).round() as i64)
    }

    /// Calendar instant -> numeric offset.
    pub fn date_to_num(&self, instant: NaiveDateTime) -> f64 {
        let us = (instant - self.epoch).num_microseconds().unwrap_or(0);
        us as f64 / self.unit.microseconds()
    }
}

fn parse_epoch(text: &str) -> Result<NaiveDateTime> {
    let cleaned = text
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();
    for fmt in &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(Error::Dataset(format!("unparseable epoch: {:?}", text)))
}

/// The timestamp format shared by every global attribute that carries
/// a calendar time: `YYYY-MM-DDThh:mm:ss.sssZ`, millisecond precision.
pub fn format_timestamp(instant: NaiveDateTime) -> String {
    format!("{}Z", instant.format("%Y-%m-%dT%H:%M:%S%.3f"))
}
