// src/generators/mod.rs
//! Alert generators: pluggable sources of candidate events.

pub mod rate_threshold;

pub use rate_threshold::RateThresholdGenerator;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::error::RadarError;
use crate::event::Event;
use crate::marketdata::Fusion;

/// A source of candidate alerts. Generators may keep state between ticks
/// (streaks, last values); the engine calls them one at a time.
#[async_trait::async_trait]
pub trait AlertGenerator: Send {
    fn name(&self) -> &str;

    /// Minimum spacing between evaluations. Zero means every tick.
    fn min_interval(&self) -> Duration;

    async fn evaluate(
        &mut self,
        trade_date: &str,
        fusion: Option<&dyn Fusion>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
}

/// Build enabled generators from config. `offset` is the local market offset
/// used for intraday windows.
pub fn build_generators(
    cfgs: &[GeneratorConfig],
    offset: FixedOffset,
) -> Result<Vec<Box<dyn AlertGenerator>>, RadarError> {
    let mut out: Vec<Box<dyn AlertGenerator>> = Vec::new();
    for c in cfgs {
        match c {
            GeneratorConfig::RateThreshold(rc) => {
                if !rc.enabled {
                    continue;
                }
                out.push(Box::new(RateThresholdGenerator::new(rc, offset)?));
            }
        }
    }
    Ok(out)
}

/// Inclusive `HH:MM` window check. Windows with `start > end` wrap past midnight.
pub fn within_window(t: NaiveTime, start: Option<NaiveTime>, end: Option<NaiveTime>) -> bool {
    match (start, end) {
        (None, None) => true,
        (Some(s), None) => t >= s,
        (None, Some(e)) => t <= e,
        (Some(s), Some(e)) if s <= e => t >= s && t <= e,
        (Some(s), Some(e)) => t >= s || t <= e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let (s, e) = (Some(hm(9, 30)), Some(hm(15, 0)));
        assert!(within_window(hm(9, 30), s, e));
        assert!(within_window(hm(15, 0), s, e));
        assert!(!within_window(hm(15, 1), s, e));
        assert!(within_window(hm(3, 0), None, None));
        assert!(within_window(hm(10, 0), s, None));
        assert!(!within_window(hm(16, 0), None, e));
    }

    #[test]
    fn overnight_window_wraps() {
        let (s, e) = (Some(hm(22, 0)), Some(hm(2, 0)));
        assert!(within_window(hm(23, 0), s, e));
        assert!(within_window(hm(1, 0), s, e));
        assert!(!within_window(hm(12, 0), s, e));
    }
}
