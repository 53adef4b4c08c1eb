// src/optimizer/report.rs
//! Markdown summary of one optimizer run.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

use super::bandit::Allocation;

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageStat {
    pub window_sec: u64,
    pub total_events: usize,
    pub labeled_events: usize,
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardRateStat {
    pub signal: String,
    pub window_sec: u64,
    pub n: usize,
    pub reward_sum: usize,
    pub rate_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub input_path: String,
    /// Empty when no labels file was given.
    pub labels_path: String,
    /// 0 means labels were not used for bandit updates.
    pub primary_window_sec: u64,
    pub warnings: Vec<String>,
    pub label_warnings: Vec<String>,
    pub unique_events: usize,
    pub rewards_used: usize,
    pub rewards_from_labels: usize,
    pub rewards_from_paper: usize,
    pub coverage: Vec<CoverageStat>,
    pub reward_rates: Vec<RewardRateStat>,
    pub arms_total: usize,
    pub alloc: Vec<Allocation>,
}

impl Report {
    pub fn render_markdown(&self) -> String {
        let mut b = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_markdown(&mut b);
        b
    }

    fn write_markdown(&self, b: &mut String) -> std::fmt::Result {
        b.push_str("# Optimizer Report\n\n");
        writeln!(
            b,
            "- generated_at: `{}`",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(b, "- input: `{}`", self.input_path)?;
        if !self.labels_path.is_empty() {
            writeln!(b, "- labels: `{}`", self.labels_path)?;
            if self.primary_window_sec > 0 {
                writeln!(b, "- labels_primary_window_sec: `{}`", self.primary_window_sec)?;
            }
        }
        writeln!(b, "- arms_total: `{}`", self.arms_total)?;
        if self.unique_events > 0 {
            writeln!(b, "- unique_events: `{}`", self.unique_events)?;
        }
        if self.rewards_used > 0 {
            writeln!(
                b,
                "- rewards_used: `{}` (labels={}, paper={})",
                self.rewards_used, self.rewards_from_labels, self.rewards_from_paper
            )?;
        }
        b.push('\n');

        if !self.warnings.is_empty() || !self.label_warnings.is_empty() {
            b.push_str("## Warnings\n");
            for w in self.warnings.iter().chain(&self.label_warnings) {
                writeln!(b, "- {w}")?;
            }
            b.push('\n');
        }

        if !self.labels_path.is_empty() && !self.coverage.is_empty() {
            b.push_str("## Labeled Coverage (by window)\n");
            b.push_str("| window_sec | labeled_events | total_events | coverage |\n|---:|---:|---:|---:|\n");
            for c in &self.coverage {
                writeln!(
                    b,
                    "| {} | {} | {} | {:.2}% |",
                    c.window_sec, c.labeled_events, c.total_events, c.coverage_pct
                )?;
            }
            b.push('\n');
        }

        if !self.labels_path.is_empty() && !self.reward_rates.is_empty() {
            b.push_str("## Reward Rate (by signal/window)\n");
            b.push_str("| signal | window_sec | reward_rate | n | reward_sum |\n|---|---:|---:|---:|---:|\n");
            for r in &self.reward_rates {
                writeln!(
                    b,
                    "| {} | {} | {:.2}% | {} | {} |",
                    r.signal, r.window_sec, r.rate_pct, r.n, r.reward_sum
                )?;
            }
            b.push('\n');
        }

        b.push_str("## Suggested Action Allocation (Thompson Sampling)\n");
        if self.alloc.is_empty() {
            b.push_str("_(none)_\n");
            return Ok(());
        }
        b.push_str("| key | sample_score | mean | n |\n|---|---:|---:|---:|\n");
        for a in &self.alloc {
            writeln!(b, "| {} | {:.4} | {:.4} | {} |", a.key, a.score, a.mean, a.n)?;
        }
        b.push('\n');
        b.push_str("## Notes\n");
        b.push_str("- Rewards come from the labels file at `labels_primary_window_sec` when present, otherwise from `event.data.reward`.\n");
        b.push_str("- Events without either still register an arm but do not move its posterior.\n");
        Ok(())
    }
}
