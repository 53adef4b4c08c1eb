// src/marketdata/fusion.rs
//! Multi-provider consensus with a per-provider circuit breaker.
//!
//! Every call fans out to all enabled providers concurrently (each bounded by
//! its own timeout), discards invalid/stale quotes, takes the median of the
//! rest and counts inliers within `max_abs_diff`. Provider health is an EMA
//! score plus consecutive failure/outlier counters; crossing a threshold
//! disables the provider for `cooldown`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::{
    Confidence, Fusion, FusionReason, FusionSnapshot, Provider, ProviderFailure, ProviderResult,
    Snapshot,
};
use crate::config::MarketDataConfig;
use crate::error::RadarError;

const HEALTH_ALPHA: f64 = 0.15;
const INITIAL_SCORE: f64 = 0.5;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct FusionOptions {
    pub timeout: Duration,
    pub required_sources: usize,
    pub max_abs_diff: f64,
    pub staleness: ChronoDuration,
    pub min_valid: f64,
    pub max_valid: f64,
    pub fail_threshold: u32,
    pub outlier_threshold: u32,
    pub cooldown: ChronoDuration,
    pub clock: Clock,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self::from(&MarketDataConfig::default())
    }
}

impl From<&MarketDataConfig> for FusionOptions {
    fn from(c: &MarketDataConfig) -> Self {
        Self {
            timeout: Duration::from_millis(c.timeout_ms),
            required_sources: c.required_sources,
            max_abs_diff: c.max_abs_diff,
            staleness: ChronoDuration::seconds(c.staleness_sec as i64),
            min_valid: c.min_valid,
            max_valid: c.max_valid,
            fail_threshold: c.fail_threshold,
            outlier_threshold: c.outlier_threshold,
            cooldown: ChronoDuration::seconds(c.cooldown_sec as i64),
            clock: Arc::new(Utc::now),
        }
    }
}

impl FusionOptions {
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Zero values fall back to the defaults.
    fn normalized(mut self) -> Self {
        let d = MarketDataConfig::default();
        if self.required_sources == 0 {
            self.required_sources = d.required_sources;
        }
        if self.max_abs_diff <= 0.0 {
            self.max_abs_diff = d.max_abs_diff;
        }
        if self.staleness <= ChronoDuration::zero() {
            self.staleness = ChronoDuration::seconds(d.staleness_sec as i64);
        }
        if self.max_valid <= 0.0 {
            self.max_valid = d.max_valid;
        }
        if self.fail_threshold == 0 {
            self.fail_threshold = d.fail_threshold;
        }
        if self.outlier_threshold == 0 {
            self.outlier_threshold = d.outlier_threshold;
        }
        if self.cooldown <= ChronoDuration::zero() {
            self.cooldown = ChronoDuration::seconds(d.cooldown_sec as i64);
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_millis(d.timeout_ms);
        }
        self
    }
}

/// Health of a single provider as tracked by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub score: f64,
    pub consecutive_failures: u32,
    pub consecutive_outliers: u32,
    pub disabled_until: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            score: INITIAL_SCORE,
            consecutive_failures: 0,
            consecutive_outliers: 0,
            disabled_until: None,
        }
    }
}

impl ProviderHealth {
    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| now < until)
    }

    fn on_failure(&mut self) {
        self.score *= 1.0 - HEALTH_ALPHA;
        self.consecutive_failures += 1;
        self.consecutive_outliers += 1;
    }

    fn on_inlier(&mut self) {
        self.score += HEALTH_ALPHA * (1.0 - self.score);
        self.consecutive_failures = 0;
        self.consecutive_outliers = 0;
    }

    fn on_outlier(&mut self) {
        self.score *= 1.0 - HEALTH_ALPHA;
        self.consecutive_failures = 0;
        self.consecutive_outliers += 1;
    }

    /// Returns true when the breaker tripped.
    fn maybe_trip(&mut self, opts: &FusionOptions, now: DateTime<Utc>) -> bool {
        if self.consecutive_failures >= opts.fail_threshold
            || self.consecutive_outliers >= opts.outlier_threshold
        {
            self.disabled_until = Some(now + opts.cooldown);
            self.consecutive_failures = 0;
            self.consecutive_outliers = 0;
            return true;
        }
        false
    }
}

pub struct FusionEngine {
    providers: Vec<Arc<dyn Provider>>,
    opts: FusionOptions,
    health: Mutex<HashMap<String, ProviderHealth>>,
}

impl FusionEngine {
    pub fn new(providers: Vec<Arc<dyn Provider>>, opts: FusionOptions) -> Result<Self, RadarError> {
        if providers.is_empty() {
            return Err(RadarError::NoProviders);
        }
        crate::metrics::ensure_described();
        let health = providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderHealth::default()))
            .collect();
        Ok(Self {
            providers,
            opts: opts.normalized(),
            health: Mutex::new(health),
        })
    }

    pub fn options(&self) -> &FusionOptions {
        &self.opts
    }

    /// Read-only copy of every provider's health.
    pub fn health_snapshot(&self) -> BTreeMap<String, ProviderHealth> {
        self.health
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Fan out to all enabled providers and fuse their quotes.
    ///
    /// Provider results keep the configured provider order. Only providers
    /// that were actually asked have their health updated.
    pub async fn fuse(&self, symbol: &str) -> FusionSnapshot {
        let now = (self.opts.clock)();
        counter!("radar_fusion_requests_total").increment(1);

        let disabled: Vec<bool> = {
            let health = self.health.lock();
            self.providers
                .iter()
                .map(|p| health.get(p.name()).is_some_and(|h| h.is_disabled(now)))
                .collect()
        };

        let mut outcomes: Vec<Option<Result<Snapshot, ProviderFailure>>> =
            (0..self.providers.len()).map(|_| None).collect();

        let mut set = JoinSet::new();
        for (idx, p) in self.providers.iter().enumerate() {
            if disabled[idx] {
                continue;
            }
            let p = Arc::clone(p);
            let sym = symbol.to_string();
            let timeout = self.opts.timeout;
            set.spawn(async move {
                let out = match tokio::time::timeout(timeout, p.fetch(&sym)).await {
                    Ok(Ok(snap)) => Ok(snap),
                    Ok(Err(e)) => Err(ProviderFailure::Fetch(format!("{e:#}"))),
                    Err(_) => Err(ProviderFailure::Timeout),
                };
                (idx, out)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, out)) => outcomes[idx] = Some(out),
                Err(e) => tracing::warn!(error = %e, symbol, "provider task aborted"),
            }
        }

        let mut results = Vec::with_capacity(self.providers.len());
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for (idx, p) in self.providers.iter().enumerate() {
            let name = p.name();
            if disabled[idx] {
                results.push(ProviderResult::failed(name, None, ProviderFailure::CircuitOpen));
                continue;
            }
            let outcome = outcomes[idx]
                .take()
                .unwrap_or_else(|| Err(ProviderFailure::Fetch("provider task aborted".into())));
            match outcome {
                Err(failure) => results.push(ProviderResult::failed(name, None, failure)),
                Ok(snap) => {
                    let stale = now.signed_duration_since(snap.timestamp) > self.opts.staleness;
                    let r = snap.rate_pct;
                    let invalid =
                        !r.is_finite() || r < self.opts.min_valid || r > self.opts.max_valid;
                    if stale || invalid {
                        let mut pr =
                            ProviderResult::failed(name, Some(snap), ProviderFailure::InvalidOrStale);
                        pr.stale = stale;
                        results.push(pr);
                        continue;
                    }
                    candidates.push((results.len(), r));
                    results.push(ProviderResult {
                        provider: name.to_string(),
                        snapshot: Some(snap),
                        error: None,
                        stale: false,
                        inlier: false,
                        outlier: false,
                    });
                }
            }
        }

        let (consensus, confidence, reason) = if candidates.is_empty() {
            (0.0, Confidence::Fail, FusionReason::NoValidSources)
        } else {
            let rates: Vec<f64> = candidates.iter().map(|(_, r)| *r).collect();
            let consensus = median(&rates);
            let mut inliers = 0usize;
            for (slot, r) in &candidates {
                if (r - consensus).abs() <= self.opts.max_abs_diff {
                    results[*slot].inlier = true;
                    inliers += 1;
                } else {
                    results[*slot].outlier = true;
                }
            }
            if inliers >= self.opts.required_sources {
                (consensus, Confidence::Pass, FusionReason::ConsensusPass)
            } else {
                (consensus, Confidence::Fail, FusionReason::InsufficientConsensus)
            }
        };

        self.update_health(now, &results, &disabled);

        FusionSnapshot {
            symbol: symbol.to_string(),
            timestamp: now,
            consensus_rate_pct: consensus,
            confidence,
            reason,
            provider_results: results,
        }
    }

    fn update_health(&self, now: DateTime<Utc>, results: &[ProviderResult], skipped: &[bool]) {
        let mut health = self.health.lock();
        for (r, was_skipped) in results.iter().zip(skipped) {
            if *was_skipped {
                continue;
            }
            let h = health.entry(r.provider.clone()).or_default();
            if let Some(failure) = &r.error {
                counter!(
                    "radar_fusion_provider_failures_total",
                    "provider" => r.provider.clone(),
                    "kind" => failure.kind()
                )
                .increment(1);
                h.on_failure();
            } else if r.inlier {
                h.on_inlier();
            } else {
                h.on_outlier();
            }
            if h.maybe_trip(&self.opts, now) {
                counter!("radar_fusion_circuit_trips_total").increment(1);
                tracing::warn!(
                    provider = %r.provider,
                    score = h.score,
                    until = ?h.disabled_until,
                    "provider disabled by circuit breaker"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl Fusion for FusionEngine {
    async fn fetch_fusion(&self, symbol: &str) -> anyhow::Result<FusionSnapshot> {
        Ok(self.fuse(symbol).await)
    }
}

/// Median of a non-empty slice; the mean of the two middle values for even
/// lengths. Returns 0.0 for an empty slice.
pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut ys = xs.to_vec();
    ys.sort_by(f64::total_cmp);
    let m = ys.len() / 2;
    if ys.len() % 2 == 1 {
        ys[m]
    } else {
        (ys[m - 1] + ys[m]) / 2.0
    }
}
