// src/labeler/mod.rs
//! Delayed-reward labeler.
//!
//! Re-observes the market a fixed delay after each alert and writes one
//! binary label per (event, window): did the rate still hold at or above the
//! generator's threshold? Runs are idempotent: pairs already present in the
//! labels file are never written again.

pub mod duration;

pub use duration::{parse_duration, parse_windows};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GeneratorConfig, LabelerSettings, RadarConfig};
use crate::error::RadarError;
use crate::labels::{Label, LabelsIndex};
use crate::marketdata::{Clock, Confidence, Fusion};
use crate::paper::{event_id, read_jsonl_path, PaperRow};

pub const REASON_HOLD: &str = "hold_above_threshold";
pub const REASON_DROPPED: &str = "dropped_below_threshold";
pub const REASON_MISSING_THRESHOLD: &str = "missing_threshold";
pub const REASON_FETCH_ERROR: &str = "fetch_error";

#[derive(Clone)]
pub struct LabelerConfig {
    pub windows: Vec<Duration>,
    pub grace: Duration,
    pub only_kind: Option<String>,
    pub max_per_run: usize,
    pub clock: Clock,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(300),
            ],
            grace: Duration::from_secs(30),
            only_kind: None,
            max_per_run: 200,
            clock: Arc::new(Utc::now),
        }
    }
}

impl LabelerConfig {
    pub fn from_settings(s: &LabelerSettings) -> Result<Self, RadarError> {
        Ok(Self {
            windows: parse_windows(&s.windows)?,
            grace: parse_duration(&s.grace)?,
            only_kind: s
                .only_kind
                .as_deref()
                .map(|k| k.trim().to_ascii_lowercase())
                .filter(|k| !k.is_empty()),
            max_per_run: s.max_per_run,
            ..Self::default()
        })
    }
}

/// Per-source thresholds: `min_rate_pct` of each rate-threshold generator,
/// overridden by explicit `[labeler.thresholds]` entries.
pub fn thresholds_from_config(cfg: &RadarConfig) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for g in &cfg.generators {
        match g {
            GeneratorConfig::RateThreshold(rc) => {
                if !rc.name.is_empty() && rc.min_rate_pct > 0.0 {
                    out.insert(rc.name.clone(), rc.min_rate_pct);
                }
            }
        }
    }
    for (source, thr) in &cfg.labeler.thresholds {
        out.insert(source.clone(), *thr);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelRunStats {
    pub written: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

pub struct Labeler {
    fusion: Option<Arc<dyn Fusion>>,
    cfg: LabelerConfig,
    thresholds: HashMap<String, f64>,
}

struct Exit {
    rate: f64,
    confidence: Confidence,
    reason: String,
}

impl Labeler {
    pub fn new(
        fusion: Option<Arc<dyn Fusion>>,
        cfg: LabelerConfig,
        thresholds: HashMap<String, f64>,
    ) -> Self {
        Self {
            fusion,
            cfg,
            thresholds,
        }
    }

    fn wants(&self, row: &PaperRow) -> bool {
        let Some(kind) = &self.cfg.only_kind else {
            return true;
        };
        row.event
            .tags
            .get("kind")
            .is_some_and(|k| k.trim().to_ascii_lowercase() == *kind)
    }

    async fn fetch_exit(&self, symbol: &str) -> Exit {
        let res = match &self.fusion {
            Some(f) => f.fetch_fusion(symbol).await,
            None => Err(anyhow::anyhow!("marketdata disabled")),
        };
        match res {
            Ok(fs) => Exit {
                rate: fs.consensus_rate_pct,
                confidence: fs.confidence,
                reason: fs.reason.as_str().to_string(),
            },
            Err(e) => {
                tracing::warn!(symbol, error = %format!("{e:#}"), "label fetch failed");
                Exit {
                    rate: 0.0,
                    confidence: Confidence::Fail,
                    reason: REASON_FETCH_ERROR.to_string(),
                }
            }
        }
    }

    /// One labeling pass over `paper_path`, appending to `labels_path`.
    pub async fn run_once(&self, paper_path: &Path, labels_path: &Path) -> Result<LabelRunStats> {
        let now = (self.cfg.clock)();
        let (rows, warnings) = read_jsonl_path(paper_path)
            .with_context(|| format!("read paper log {}", paper_path.display()))?;
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), path = %paper_path.display(), "paper log warnings");
        }
        let mut stats = LabelRunStats {
            warnings,
            ..LabelRunStats::default()
        };

        let existing = LabelsIndex::read_path_or_empty(labels_path)
            .with_context(|| format!("read labels {}", labels_path.display()))?;
        let mut labeled: HashSet<(String, u64)> = existing
            .by_event
            .iter()
            .flat_map(|(id, by_w)| by_w.keys().map(move |w| (id.clone(), *w)))
            .collect();

        let mut candidates: Vec<(DateTime<Utc>, &PaperRow)> = Vec::new();
        for row in &rows {
            let ev = &row.event;
            if !self.wants(row) || ev.source.trim().is_empty() || ev.symbol.trim().is_empty() {
                stats.skipped += 1;
                continue;
            }
            match DateTime::parse_from_rfc3339(row.ts.trim()) {
                Ok(ts) => candidates.push((ts.with_timezone(&Utc), row)),
                Err(_) => stats.skipped += 1,
            }
        }
        candidates.sort_by_key(|(ts, _)| *ts);

        if let Some(dir) = labels_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(labels_path)
            .with_context(|| format!("open {}", labels_path.display()))?;
        let mut out = BufWriter::new(file);

        // Zero grace disables the lateness bound; so does one too large for chrono.
        let grace = if self.cfg.grace.is_zero() {
            None
        } else {
            ChronoDuration::from_std(self.cfg.grace).ok()
        };
        'rows: for (event_ts, row) in candidates {
            let ev = &row.event;
            let id = event_id(row);
            let thr = self.thresholds.get(&ev.source).copied().unwrap_or(0.0);
            let entry = ev
                .number("consensus_rate_pct")
                .or_else(|| ev.number("rate_pct"))
                .unwrap_or(0.0);

            for w in &self.cfg.windows {
                if stats.written >= self.cfg.max_per_run {
                    break 'rows;
                }
                let window_sec = w.as_secs();
                if labeled.contains(&(id.clone(), window_sec)) {
                    continue;
                }
                let Ok(window) = ChronoDuration::from_std(*w) else {
                    continue;
                };
                let Some(due) = event_ts.checked_add_signed(window) else {
                    continue;
                };
                if now < due {
                    continue;
                }
                let late_by = now - due;
                if grace.is_some_and(|g| late_by > g) {
                    continue;
                }

                let exit = self.fetch_exit(&ev.symbol).await;
                let (reward, reason) = score(thr, &exit);

                let label = Label {
                    event_id: id.clone(),
                    event_ts,
                    source: ev.source.clone(),
                    symbol: ev.symbol.clone(),
                    trade_date: ev.trade_date.clone(),
                    window_sec,
                    grace_sec: self.cfg.grace.as_secs(),
                    late_by_sec: late_by.num_seconds().max(0) as u64,
                    threshold: thr,
                    entry_rate_pct: entry,
                    exit_rate_pct: exit.rate,
                    confidence: exit.confidence,
                    reward,
                    reason,
                };
                serde_json::to_writer(&mut out, &label).context("encode label")?;
                out.write_all(b"\n").context("write label")?;
                labeled.insert((id.clone(), window_sec));
                stats.written += 1;
            }
        }
        out.flush().context("flush labels")?;

        tracing::info!(
            written = stats.written,
            skipped = stats.skipped,
            path = %labels_path.display(),
            "labeler pass complete"
        );
        Ok(stats)
    }
}

/// Reward and reason for one observation.
fn score(thr: f64, exit: &Exit) -> (u8, String) {
    if thr <= 0.0 {
        return (0, REASON_MISSING_THRESHOLD.to_string());
    }
    if exit.confidence == Confidence::Pass {
        if exit.rate >= thr {
            return (1, REASON_HOLD.to_string());
        }
        return (0, REASON_DROPPED.to_string());
    }
    (0, exit.reason.clone())
}
