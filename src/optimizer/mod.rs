// src/optimizer/mod.rs
//! Offline bandit optimizer.
//!
//! Turns the paper log (and, when present, the labels file) into one
//! Beta-Bernoulli arm per alert source, then uses Thompson sampling both for
//! a ranked allocation (reported) and for the daily quota recommendation the
//! engine reads back.

pub mod bandit;
pub mod quotas;
pub mod report;
pub mod scheduler;

pub use bandit::{gamma_sample, Allocation, Bandit, BetaBernoulliArm};
pub use quotas::{build_recommendation, suggest_quotas};
pub use report::{CoverageStat, Report, RewardRateStat};
pub use scheduler::{build_poll_plan, PollItem, PollPlanItem, SchedulerConfig};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use crate::error::RadarError;
use crate::labels::LabelsIndex;
use crate::paper::{event_id, reward_from_row, PaperRow};
use crate::reco::Recommendation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardSource {
    Labels,
    Paper,
}

/// Reward for one historical row: the label at the primary window wins,
/// then the row's inline reward. `None` means the arm is registered but not
/// updated.
pub fn resolve_reward(
    row: &PaperRow,
    labels: &LabelsIndex,
    primary_window_sec: u64,
) -> Option<(u8, RewardSource)> {
    if primary_window_sec > 0 {
        if let Some(l) = labels.get(&event_id(row), primary_window_sec) {
            return Some((u8::from(l.reward > 0), RewardSource::Labels));
        }
    }
    reward_from_row(row).map(|r| (u8::from(r > 0), RewardSource::Paper))
}

/// Labels for a run. A missing file is not fatal: the index is empty and
/// carries a `labels_not_found` warning.
pub fn load_labels(path: &Path) -> Result<LabelsIndex> {
    match LabelsIndex::read_path(path) {
        Ok(idx) => Ok(idx),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LabelsIndex {
            warnings: vec!["labels_not_found".to_string()],
            ..LabelsIndex::default()
        }),
        Err(e) => Err(e).with_context(|| format!("read labels {}", path.display())),
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerInput {
    pub rows: Vec<PaperRow>,
    pub paper_warnings: Vec<String>,
    /// How the paper input is named in the report (`<stdin>` for stdin).
    pub input_label: String,
    /// Labels path as given; empty when labels are not used.
    pub labels_path: String,
    pub labels: LabelsIndex,
    /// 0 picks the labels' default primary window.
    pub label_window_sec: u64,
    pub seed: u64,
    pub slots: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OptimizerOutput {
    pub report: Report,
    pub recommendation: Recommendation,
    pub bandit: Bandit,
}

pub fn run(input: &OptimizerInput) -> Result<OptimizerOutput, RadarError> {
    if input.slots <= 0 {
        return Err(RadarError::InvalidSlots(input.slots));
    }
    let use_labels = !input.labels_path.is_empty();
    let labels = &input.labels;
    let primary_window_sec = if input.label_window_sec == 0 && use_labels {
        labels.default_primary_window_sec()
    } else {
        input.label_window_sec
    };

    // Coverage denominator: unique event ids, first source seen wins.
    let mut unique: HashMap<String, &str> = HashMap::new();
    for row in &input.rows {
        unique
            .entry(event_id(row))
            .or_insert(row.event.source.as_str());
    }

    let mut coverage = Vec::new();
    let mut rates: BTreeMap<(String, u64), (usize, usize)> = BTreeMap::new();
    if use_labels && !unique.is_empty() {
        for &w in &labels.windows {
            let labeled = unique.keys().filter(|id| labels.has(id, w)).count();
            coverage.push(CoverageStat {
                window_sec: w,
                total_events: unique.len(),
                labeled_events: labeled,
                coverage_pct: labeled as f64 * 100.0 / unique.len() as f64,
            });
        }
        for (id, fallback) in &unique {
            for &w in &labels.windows {
                let Some(l) = labels.get(id, w) else { continue };
                let signal = if l.source.is_empty() { fallback.to_string() } else { l.source.clone() };
                let agg = rates.entry((signal, w)).or_insert((0, 0));
                agg.0 += 1;
                if l.reward > 0 {
                    agg.1 += 1;
                }
            }
        }
    }
    let reward_rates = rates
        .into_iter()
        .map(|((signal, window_sec), (n, sum))| RewardRateStat {
            signal,
            window_sec,
            n,
            reward_sum: sum,
            rate_pct: if n > 0 { sum as f64 * 100.0 / n as f64 } else { 0.0 },
        })
        .collect();

    let mut b = Bandit::new();
    let (mut used, mut from_labels, mut from_paper) = (0usize, 0usize, 0usize);
    for row in &input.rows {
        let key = row.event.source.as_str();
        match resolve_reward(row, labels, primary_window_sec) {
            Some((reward, source)) => {
                b.update(key, reward);
                used += 1;
                match source {
                    RewardSource::Labels => from_labels += 1,
                    RewardSource::Paper => from_paper += 1,
                }
            }
            None => {
                b.ensure(key);
            }
        }
    }

    let alloc = b.suggest_allocation(&mut StdRng::seed_from_u64(input.seed), input.slots)?;
    let quotas = suggest_quotas(&mut StdRng::seed_from_u64(input.seed), &b, input.slots);
    let recommendation = build_recommendation(
        input.now,
        &input.input_label,
        &input.labels_path,
        primary_window_sec,
        input.slots,
        &quotas,
        &b,
    );

    tracing::info!(
        arms = b.len(),
        rows = input.rows.len(),
        rewards_used = used,
        from_labels,
        from_paper,
        primary_window_sec,
        "optimizer run complete"
    );

    let report = Report {
        generated_at: input.now,
        input_path: input.input_label.clone(),
        labels_path: input.labels_path.clone(),
        primary_window_sec,
        warnings: input.paper_warnings.clone(),
        label_warnings: labels.warnings.clone(),
        unique_events: unique.len(),
        rewards_used: used,
        rewards_from_labels: from_labels,
        rewards_from_paper: from_paper,
        coverage,
        reward_rates,
        arms_total: b.len(),
        alloc,
    };
    Ok(OptimizerOutput {
        report,
        recommendation,
        bandit: b,
    })
}
