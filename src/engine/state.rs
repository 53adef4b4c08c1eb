// src/engine/state.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

use crate::event::Tier;

/// Keyed cooldown gate: a key is "hot" for `ttl` after it was recorded.
#[derive(Debug, Clone)]
pub struct TtlCache<K> {
    last_seen: HashMap<K, DateTime<Utc>>,
}

impl<K> Default for TtlCache<K> {
    fn default() -> Self {
        Self {
            last_seen: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TtlCache<K> {
    /// True when `key` was recorded within `ttl` before `now`. Does NOT mutate state.
    pub fn is_hot(&self, key: &K, ttl: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.last_seen
            .get(key)
            .is_some_and(|ts| now.signed_duration_since(*ts) <= ttl)
    }

    pub fn record(&mut self, key: K, now: DateTime<Utc>) {
        self.last_seen.insert(key, now);
    }

    /// Forget keys older than `ttl`.
    pub fn sweep(&mut self, ttl: ChronoDuration, now: DateTime<Utc>) {
        self.last_seen
            .retain(|_, ts| now.signed_duration_since(*ts) <= ttl);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub tier: Tier,
    pub source: String,
    pub symbol: String,
}

/// Daily budget counters, scoped to one trade date at a time.
#[derive(Debug, Clone, Default)]
pub struct DailyCounters {
    trade_date: String,
    by_tier: HashMap<Tier, usize>,
    action_by_source: HashMap<String, usize>,
}

impl DailyCounters {
    /// Clear every counter when the trade date changes.
    pub fn roll_to(&mut self, trade_date: &str) {
        if self.trade_date != trade_date {
            self.trade_date = trade_date.to_string();
            self.by_tier.clear();
            self.action_by_source.clear();
        }
    }

    pub fn trade_date(&self) -> &str {
        &self.trade_date
    }

    pub fn tier(&self, tier: Tier) -> usize {
        self.by_tier.get(&tier).copied().unwrap_or(0)
    }

    pub fn action_for(&self, source: &str) -> usize {
        self.action_by_source.get(source).copied().unwrap_or(0)
    }

    pub fn bump_tier(&mut self, tier: Tier) {
        *self.by_tier.entry(tier).or_insert(0) += 1;
    }

    pub fn bump_action_source(&mut self, source: &str) {
        *self.action_by_source.entry(source.to_string()).or_insert(0) += 1;
    }
}

/// Mutable memory of the admission pipeline. Owned by the engine loop and
/// only touched from one tick at a time.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub sent: TtlCache<String>,
    pub symbol_last: TtlCache<CooldownKey>,
    pub daily: DailyCounters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ttl_cache_hot_then_cold() {
        let mut c = TtlCache::default();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 29, 9, 0, 0).unwrap();
        let ttl = ChronoDuration::seconds(60);
        assert!(!c.is_hot(&"k", ttl, t0));
        c.record("k", t0);
        assert!(c.is_hot(&"k", ttl, t0 + ChronoDuration::seconds(60)));
        assert!(!c.is_hot(&"k", ttl, t0 + ChronoDuration::seconds(61)));

        c.sweep(ttl, t0 + ChronoDuration::seconds(61));
        assert!(c.is_empty());
    }

    #[test]
    fn daily_counters_reset_on_new_date() {
        let mut d = DailyCounters::default();
        d.roll_to("20260129");
        d.bump_tier(Tier::Action);
        d.bump_action_source("repo");
        d.roll_to("20260129");
        assert_eq!(d.tier(Tier::Action), 1);
        assert_eq!(d.action_for("repo"), 1);

        d.roll_to("20260130");
        assert_eq!(d.tier(Tier::Action), 0);
        assert_eq!(d.action_for("repo"), 0);
        assert_eq!(d.trade_date(), "20260130");
    }
}
