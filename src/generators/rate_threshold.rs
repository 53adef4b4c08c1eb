// src/generators/rate_threshold.rs
use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use super::{within_window, AlertGenerator};
use crate::config::{parse_hhmm, RateThresholdConfig};
use crate::error::RadarError;
use crate::event::{Event, Tier};
use crate::marketdata::{Fusion, FusionSnapshot};

/// Fires when a symbol's fused rate stays at or above `min_rate_pct` with a
/// passing consensus for `confirm_k` consecutive evaluations.
pub struct RateThresholdGenerator {
    name: String,
    tier: Tier,
    min_interval: Duration,
    market: String,
    symbols: Vec<String>,
    min_rate_pct: f64,
    top_n: usize,
    confirm_k: u32,
    window_start: Option<NaiveTime>,
    window_end: Option<NaiveTime>,
    offset: FixedOffset,
    streaks: HashMap<String, u32>,
}

impl RateThresholdGenerator {
    pub fn new(cfg: &RateThresholdConfig, offset: FixedOffset) -> Result<Self, RadarError> {
        let defaults = RateThresholdConfig::default();
        let symbols: Vec<String> = cfg
            .symbols
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(RadarError::config(format!("generator {}: no symbols", cfg.name)));
        }
        Ok(Self {
            name: cfg.name.clone(),
            tier: cfg.tier,
            min_interval: Duration::from_secs(cfg.min_interval_seconds),
            market: cfg.market.clone(),
            symbols,
            min_rate_pct: if cfg.min_rate_pct > 0.0 {
                cfg.min_rate_pct
            } else {
                defaults.min_rate_pct
            },
            top_n: if cfg.top_n > 0 { cfg.top_n } else { defaults.top_n },
            confirm_k: cfg.confirm_k.max(1),
            window_start: cfg.window_start.as_deref().map(parse_hhmm).transpose()?,
            window_end: cfg.window_end.as_deref().map(parse_hhmm).transpose()?,
            offset,
            streaks: HashMap::new(),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.min_rate_pct
    }

    fn to_event(&self, trade_date: &str, fs: &FusionSnapshot) -> Event {
        let rate = fs.consensus_rate_pct;
        let confidence = if fs.is_pass() { "PASS" } else { "FAIL" };

        let mut body = format!(
            "consensus_rate={rate:.4}%\nconfidence={confidence}\nreason={}\n",
            fs.reason.as_str()
        );
        for pr in &fs.provider_results {
            match (&pr.error, &pr.snapshot) {
                (Some(err), _) => {
                    let _ = writeln!(body, "- {}: error={err}", pr.provider);
                }
                (None, Some(s)) => {
                    let _ = writeln!(
                        body,
                        "- {}: rate={:.4}% inlier={} outlier={}",
                        pr.provider, s.rate_pct, pr.inlier, pr.outlier
                    );
                }
                (None, None) => {}
            }
        }

        let mut ev = Event::new(&self.name, trade_date, format!("Rate spike {rate:.2}% ({})", fs.symbol))
            .with_market(&self.market)
            .with_symbol(&fs.symbol)
            .with_body(body)
            .with_tier(self.tier)
            .with_tag("kind", "rate")
            .with_tag("strategy", "yield_spike")
            .with_tag("confidence", confidence)
            .with_number("consensus_rate_pct", rate)
            .with_number("threshold_rate_pct", self.min_rate_pct)
            .with_number("expected_edge_pct", rate - self.min_rate_pct);
        ev.set_text("confidence", confidence);
        ev.set_text("reason", fs.reason.as_str());
        ev.data.insert(
            "providers".into(),
            serde_json::to_value(&fs.provider_results).unwrap_or(Value::Null),
        );
        ev
    }
}

#[async_trait::async_trait]
impl AlertGenerator for RateThresholdGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn evaluate(
        &mut self,
        trade_date: &str,
        fusion: Option<&dyn Fusion>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let fusion = fusion.ok_or_else(|| {
            anyhow!("marketdata disabled: enable [marketdata] and providers for {}", self.name)
        })?;
        let local = now.with_timezone(&self.offset).time();
        if !within_window(local, self.window_start, self.window_end) {
            return Ok(Vec::new());
        }

        let mut hits: Vec<FusionSnapshot> = Vec::new();
        for symbol in &self.symbols {
            let fs = match fusion.fetch_fusion(symbol).await {
                Ok(fs) => fs,
                Err(e) => {
                    tracing::debug!(generator = %self.name, symbol = %symbol, error = %e, "fusion failed");
                    continue;
                }
            };
            let hot = fs.is_pass() && fs.consensus_rate_pct >= self.min_rate_pct;
            let streak = self.streaks.entry(symbol.clone()).or_insert(0);
            if !hot {
                *streak = 0;
                continue;
            }
            *streak += 1;
            if *streak >= self.confirm_k {
                hits.push(fs);
            }
        }

        hits.sort_by(|a, b| b.consensus_rate_pct.total_cmp(&a.consensus_rate_pct));
        hits.truncate(self.top_n);
        Ok(hits.iter().map(|fs| self.to_event(trade_date, fs)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketdata::{Confidence, FusionReason, ProviderResult, Snapshot};
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedFusion {
        rates: Mutex<HashMap<String, (f64, Confidence)>>,
    }

    #[async_trait::async_trait]
    impl Fusion for ScriptedFusion {
        async fn fetch_fusion(&self, symbol: &str) -> Result<FusionSnapshot> {
            let (rate, confidence) = self
                .rates
                .lock()
                .get(symbol)
                .copied()
                .ok_or_else(|| anyhow!("unknown symbol"))?;
            Ok(FusionSnapshot {
                symbol: symbol.to_string(),
                timestamp: Utc::now(),
                consensus_rate_pct: rate,
                confidence,
                reason: if confidence == Confidence::Pass {
                    FusionReason::ConsensusPass
                } else {
                    FusionReason::InsufficientConsensus
                },
                provider_results: vec![ProviderResult {
                    provider: "quotes_a".into(),
                    snapshot: Some(Snapshot {
                        symbol: symbol.to_string(),
                        rate_pct: rate,
                        timestamp: Utc::now(),
                        provider: "quotes_a".into(),
                        raw: json!({"last": rate, "venue": "SSE"})
                            .as_object()
                            .cloned()
                            .unwrap_or_default(),
                    }),
                    error: None,
                    stale: false,
                    inlier: true,
                    outlier: false,
                }],
            })
        }
    }

    fn cfg(confirm_k: u32, top_n: usize) -> RateThresholdConfig {
        RateThresholdConfig {
            name: "repo_spike".into(),
            symbols: vec!["A".into(), "B".into(), "C".into()],
            min_rate_pct: 4.0,
            confirm_k,
            top_n,
            ..RateThresholdConfig::default()
        }
    }

    fn utc8() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[tokio::test]
    async fn emits_hot_symbols_sorted_and_capped() {
        let f = ScriptedFusion {
            rates: Mutex::new(HashMap::from([
                ("A".to_string(), (4.5, Confidence::Pass)),
                ("B".to_string(), (6.0, Confidence::Pass)),
                ("C".to_string(), (9.0, Confidence::Fail)),
            ])),
        };
        let mut g = RateThresholdGenerator::new(&cfg(1, 5), utc8()).unwrap();
        let evs = g.evaluate("20260129", Some(&f), Utc::now()).await.unwrap();
        let symbols: Vec<_> = evs.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, ["B", "A"]);
        assert_eq!(evs[0].tags["kind"], "rate");
        assert!((evs[0].number("expected_edge_pct").unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(evs[0].number("consensus_rate_pct"), Some(6.0));
        let providers = &evs[0].data["providers"];
        assert_eq!(providers[0]["provider"], "quotes_a");
        assert_eq!(providers[0]["snapshot"]["raw"]["venue"], "SSE");
        assert_eq!(providers[0]["snapshot"]["raw"]["last"], 6.0);

        let mut g = RateThresholdGenerator::new(&cfg(1, 1), utc8()).unwrap();
        let evs = g.evaluate("20260129", Some(&f), Utc::now()).await.unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].symbol, "B");
    }

    #[tokio::test]
    async fn confirm_streak_resets_when_cold() {
        let f = ScriptedFusion {
            rates: Mutex::new(HashMap::from([("A".to_string(), (5.0, Confidence::Pass))])),
        };
        let mut c = cfg(2, 5);
        c.symbols = vec!["A".into()];
        let mut g = RateThresholdGenerator::new(&c, utc8()).unwrap();
        let now = Utc::now();

        assert!(g.evaluate("d", Some(&f), now).await.unwrap().is_empty());
        assert_eq!(g.evaluate("d", Some(&f), now).await.unwrap().len(), 1);

        f.rates.lock().insert("A".into(), (3.0, Confidence::Pass));
        assert!(g.evaluate("d", Some(&f), now).await.unwrap().is_empty());
        f.rates.lock().insert("A".into(), (5.0, Confidence::Pass));
        assert!(g.evaluate("d", Some(&f), now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requires_marketdata() {
        let mut g = RateThresholdGenerator::new(&cfg(1, 5), utc8()).unwrap();
        assert!(g.evaluate("d", None, Utc::now()).await.is_err());
    }

    #[test]
    fn rejects_empty_symbol_list() {
        let c = RateThresholdConfig::default();
        assert!(RateThresholdGenerator::new(&c, utc8()).is_err());
    }
}
