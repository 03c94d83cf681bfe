// src/utils/time.rs
//! Time and duration parsing shared by events, CDR files and config.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ChargingError;

const LOCAL_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%d%H%M%S",
    "%Y%m%d%H%M%S%.f",
    "%d.%m.%Y %H:%M:%S",
];

/// Resolves an IANA zone name, falling back to UTC for `""`, `Local` and `UTC`.
pub fn timezone(name: &str) -> Result<Tz, ChargingError> {
    match name.trim() {
        "" | "Local" | "UTC" => Ok(Tz::UTC),
        other => other
            .parse::<Tz>()
            .map_err(|_| ChargingError::Config(format!("unknown timezone: {}", other))),
    }
}

/// Parses a timestamp, guessing its layout.
///
/// Empty input yields `None`. Layouts without offset are read in `tz`.
pub fn parse_time(value: &str, tz: &str) -> Result<Option<DateTime<Utc>>, ChargingError> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(None);
    }
    if value == "*now" {
        return Ok(Some(Utc::now()));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    if !is_compact_layout(value) && value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return parse_epoch(value).map(Some);
    }
    let zone = timezone(tz)?;
    for layout in LOCAL_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return zone
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| Some(t.with_timezone(&Utc)))
                .ok_or_else(|| ChargingError::InvalidArgument(format!("ambiguous time: {}", value)));
        }
    }
    Err(ChargingError::InvalidArgument(format!(
        "unsupported time format: {}",
        value
    )))
}

/// `20160419210005` or `20160419210005.247`.
fn is_compact_layout(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 14
        && bytes[..14].iter().all(u8::is_ascii_digit)
        && (bytes.len() == 14 || bytes[14] == b'.')
}

fn parse_epoch(value: &str) -> Result<DateTime<Utc>, ChargingError> {
    let invalid = || ChargingError::InvalidArgument(format!("invalid timestamp: {}", value));
    let (secs, frac) = match value.split_once('.') {
        Some((s, f)) => (s, f),
        None => (value, ""),
    };
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<9}", &frac[..frac.len().min(9)]);
        padded.parse::<u32>().map_err(|_| invalid())?
    };
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(invalid)
}

/// Parses a duration given either as bare seconds (`"65"`, `"1.5"`) or in
/// Go notation (`"1m5s"`, `"250ms"`). Empty input is zero.
pub fn parse_duration_with_secs(value: &str) -> Result<Duration, ChargingError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Duration::zero());
    }
    if let Ok(secs) = value.parse::<i64>() {
        return Duration::try_seconds(secs)
            .filter(|d| d.num_nanoseconds().is_some())
            .ok_or_else(|| out_of_range(value));
    }
    if let Ok(secs) = value.parse::<f64>() {
        return nanos_from_f64(secs * 1e9).ok_or_else(|| out_of_range(value));
    }
    parse_go_duration(value)
}

fn out_of_range(value: &str) -> ChargingError {
    ChargingError::InvalidArgument(format!("duration out of range: {}", value))
}

/// Durations are bounded to what fits in i64 nanoseconds.
fn nanos_from_f64(nanos: f64) -> Option<Duration> {
    let nanos = nanos.round();
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::nanoseconds(nanos as i64))
}

/// Parses Go duration notation: an optional sign followed by `<number><unit>`
/// pairs with units `h`, `m`, `s`, `ms`, `us`, `µs`, `ns`.
pub fn parse_go_duration(value: &str) -> Result<Duration, ChargingError> {
    let invalid = || ChargingError::InvalidArgument(format!("invalid duration: {}", value));
    let (negative, mut rest) = match value.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }
    let mut total: f64 = 0.0;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_end == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..num_end].parse().map_err(|_| invalid())?;
        rest = &rest[num_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_end] {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" => 1e3,
            "ns" => 1.0,
            _ => return Err(invalid()),
        };
        total += number * multiplier;
        rest = &rest[unit_end..];
    }
    let nanos = nanos_from_f64(total).ok_or_else(|| out_of_range(value))?;
    Ok(if negative { -nanos } else { nanos })
}

/// Go style rendering (`1m5s`, `250ms`, `0s`).
pub fn format_go_duration(d: Duration) -> String {
    let mut nanos = d.num_nanoseconds().unwrap_or(i64::MAX);
    if nanos == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if nanos < 0 {
        out.push('-');
        nanos = -nanos;
    }
    if nanos < 1_000_000_000 {
        return match nanos {
            n if n % 1_000_000 == 0 => format!("{}{}ms", out, n / 1_000_000),
            n if n % 1_000 == 0 => format!("{}{}us", out, n / 1_000),
            n => format!("{}{}ns", out, n),
        };
    }
    let hours = nanos / 3_600_000_000_000;
    nanos %= 3_600_000_000_000;
    let minutes = nanos / 60_000_000_000;
    nanos %= 60_000_000_000;
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    let secs = nanos as f64 / 1e9;
    out.push_str(&format!("{}s", secs));
    out
}

pub fn duration_secs(d: Duration) -> f64 {
    d.num_nanoseconds()
        .map(|n| n as f64 / 1e9)
        .unwrap_or_else(|| d.num_seconds() as f64)
}

/// Serializes a `chrono::Duration` as integer nanoseconds and accepts either
/// nanoseconds or a duration string when reading.
pub mod duration_ns {
    use chrono::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_nanoseconds().unwrap_or(i64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Int(n) => Ok(Duration::nanoseconds(n)),
            Raw::Float(f) => Ok(Duration::nanoseconds(f as i64)),
            Raw::Text(t) => super::parse_go_duration(&t).map_err(de::Error::custom),
        }
    }
}
