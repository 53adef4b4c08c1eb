// src/optimizer/scheduler.rs
//! Poll cadence planning: poll harder where the expected value is high.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PollItem {
    pub symbol: String,
    /// Provider reliability in [0, 1].
    pub provider_score: f64,
    /// Share of recent fusions with outliers or no consensus, in [0, 1].
    pub conflict_rate: f64,
    /// Time-of-day prior in [0, 1].
    pub window_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollPlanItem {
    pub symbol: String,
    pub priority: f64,
    pub next_in: Duration,
    /// False once the plan's cumulative polls per minute exceed the budget.
    pub within_budget: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub budget_per_minute: u32,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            budget_per_minute: 60,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
        }
    }
}

impl SchedulerConfig {
    fn normalized(self) -> Self {
        let d = Self::default();
        Self {
            budget_per_minute: if self.budget_per_minute == 0 { d.budget_per_minute } else { self.budget_per_minute },
            min_interval: if self.min_interval.is_zero() { d.min_interval } else { self.min_interval },
            max_interval: if self.max_interval.is_zero() { d.max_interval } else { self.max_interval },
        }
    }
}

pub fn clamp01(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

fn lerp_duration(a: Duration, b: Duration, t: f64) -> Duration {
    let t = clamp01(t);
    let a = a.as_secs_f64();
    let b = b.as_secs_f64();
    Duration::from_secs_f64((a + (b - a) * t).max(0.0))
}

/// 0.45 reliability + 0.45 window weight + 0.10 stability.
pub fn priority(it: &PollItem) -> f64 {
    clamp01(it.provider_score) * 0.45
        + clamp01(it.window_weight) * 0.45
        + (1.0 - clamp01(it.conflict_rate)) * 0.10
}

/// Deterministic plan, highest priority first (ties by symbol). Higher
/// priority maps to an interval closer to `min_interval`.
pub fn build_poll_plan(items: &[PollItem], cfg: SchedulerConfig) -> Vec<PollPlanItem> {
    let cfg = cfg.normalized();
    let mut out: Vec<PollPlanItem> = items
        .iter()
        .map(|it| {
            let p = priority(it);
            PollPlanItem {
                symbol: it.symbol.clone(),
                priority: p,
                next_in: lerp_duration(cfg.max_interval, cfg.min_interval, p),
                within_budget: false,
            }
        })
        .collect();
    out.sort_by(|x, y| {
        y.priority
            .total_cmp(&x.priority)
            .then_with(|| x.symbol.cmp(&y.symbol))
    });

    let budget = f64::from(cfg.budget_per_minute);
    let mut used = 0.0;
    for item in &mut out {
        let secs = item.next_in.as_secs_f64().max(f64::EPSILON);
        used += 60.0 / secs;
        if used > budget {
            break;
        }
        item.within_budget = true;
    }
    out
}
