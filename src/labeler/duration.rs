// src/labeler/duration.rs
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use crate::error::RadarError;

static RE_FULL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:\d+(?:\.\d+)?(?:ms|s|m|h))+$").ok());
static RE_PART: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|s|m|h)").ok());

/// Parse durations like `10s`, `5m`, `1m30s`, `250ms`, `1.5h`. A bare `0`
/// is accepted as zero.
pub fn parse_duration(s: &str) -> Result<Duration, RadarError> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || RadarError::Parse(format!("invalid duration '{s}'"));
    let (Some(full), Some(part)) = (RE_FULL.as_ref(), RE_PART.as_ref()) else {
        return Err(invalid());
    };
    if !full.is_match(s) {
        return Err(invalid());
    }
    let mut total = 0f64;
    for cap in part.captures_iter(s) {
        let n: f64 = cap[1].parse().map_err(|_| invalid())?;
        total += match &cap[2] {
            "ms" => n / 1000.0,
            "s" => n,
            "m" => n * 60.0,
            _ => n * 3600.0,
        };
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

/// Comma-separated list of strictly positive durations.
pub fn parse_windows(s: &str) -> Result<Vec<Duration>, RadarError> {
    if s.trim().is_empty() {
        return Err(RadarError::Parse("empty windows".into()));
    }
    let mut out = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let d = parse_duration(part)?;
        if d.is_zero() {
            return Err(RadarError::Parse(format!("window must be > 0: {part}")));
        }
        out.push(d);
    }
    if out.is_empty() {
        return Err(RadarError::Parse("no windows parsed".into()));
    }
    Ok(out)
}
