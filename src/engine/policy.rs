// src/engine/policy.rs
//! Admission pipeline: dedupe → symbol cooldown → net-edge gate → per-run
//! cap → daily caps. Each stage is a plain function over the batch so it can
//! be exercised on its own; `run_pipeline` chains them in order.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use std::collections::HashMap;

use super::state::{CooldownKey, DailyCounters, EngineState, TtlCache};
use crate::config::PolicyConfig;
use crate::event::{DowngradeReason, Event, Tier};

const FALLBACK_COOLDOWN_SWEEP: i64 = 2 * 3600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub generated: usize,
    pub deduped: usize,
    pub cooldown_dropped: usize,
    pub net_edge_downgraded: usize,
    pub run_cap_dropped: usize,
    pub daily_downgraded: usize,
    pub daily_dropped_observe: usize,
    pub admitted: usize,
}

/// `-1` and `0` both disable a TTL-based stage.
fn ttl(secs: i64) -> Option<ChronoDuration> {
    (secs > 0).then(|| ChronoDuration::seconds(secs))
}

pub fn apply_dedupe(
    sent: &mut TtlCache<String>,
    events: Vec<Event>,
    dedupe_seconds: i64,
    now: DateTime<Utc>,
) -> (Vec<Event>, usize) {
    let Some(ttl) = ttl(dedupe_seconds) else {
        return (events, 0);
    };
    sent.sweep(ttl, now);

    let mut out = Vec::with_capacity(events.len());
    let mut dropped = 0usize;
    for ev in events {
        let key = ev.content_key();
        if sent.is_hot(&key, ttl, now) {
            dropped += 1;
            continue;
        }
        sent.record(key, now);
        out.push(ev);
    }
    (out, dropped)
}

pub fn apply_symbol_cooldown(
    last: &mut TtlCache<CooldownKey>,
    events: Vec<Event>,
    cfg: &PolicyConfig,
    now: DateTime<Utc>,
) -> (Vec<Event>, usize) {
    let mut out = Vec::with_capacity(events.len());
    let mut dropped = 0usize;
    for ev in events {
        if ev.symbol.trim().is_empty() {
            out.push(ev);
            continue;
        }
        let secs = match ev.tier {
            Tier::Action => cfg.action_symbol_cooldown_seconds,
            Tier::Observe => cfg.observe_symbol_cooldown_seconds,
        };
        let Some(ttl) = ttl(secs) else {
            out.push(ev);
            continue;
        };
        let key = CooldownKey {
            tier: ev.tier,
            source: ev.source.clone(),
            symbol: ev.symbol.clone(),
        };
        if last.is_hot(&key, ttl, now) {
            dropped += 1;
            continue;
        }
        last.record(key, now);
        out.push(ev);
    }

    // Bound the map using the longer of the two TTLs.
    let sweep_secs = cfg
        .action_symbol_cooldown_seconds
        .max(cfg.observe_symbol_cooldown_seconds);
    let sweep_ttl = ttl(sweep_secs).unwrap_or_else(|| ChronoDuration::seconds(FALLBACK_COOLDOWN_SWEEP));
    last.sweep(sweep_ttl, now);

    (out, dropped)
}

/// Stamp cost-adjusted edge on every event and, when a threshold is set,
/// downgrade action events that cannot clear it.
pub fn apply_net_edge_policy(events: Vec<Event>, cfg: &PolicyConfig) -> (Vec<Event>, usize) {
    let threshold = cfg.action_net_edge_min_pct;
    let mut downgraded = 0usize;
    let out = events
        .into_iter()
        .map(|mut ev| {
            let net = stamp_net_edge(&mut ev, cfg);
            if threshold > 0.0 && ev.tier == Tier::Action {
                let reason = match net {
                    None => Some(DowngradeReason::MissingExpectedEdge),
                    Some(n) if n < threshold => Some(DowngradeReason::NetEdgeBelowThreshold),
                    Some(_) => None,
                };
                if let Some(reason) = reason {
                    ev.downgrade_to_observe(reason);
                    ev.tags.insert("policy".into(), "net_edge".into());
                    ev.set_number("policy_action_net_edge_min_pct", threshold);
                    downgraded += 1;
                }
            }
            ev
        })
        .collect();
    (out, downgraded)
}

/// Returns the net edge, or `None` when the event carries no expected edge.
fn stamp_net_edge(ev: &mut Event, cfg: &PolicyConfig) -> Option<f64> {
    let Some(expected) = ev.number("expected_edge_pct") else {
        ev.set_text("net_edge_reason", "missing_expected_edge_pct");
        return None;
    };
    let spread = ev.number("spread_pct").unwrap_or(cfg.default_spread_pct);
    let slippage = ev.number("slippage_pct").unwrap_or(cfg.default_slippage_pct);
    let fee = ev.number("fee_pct").unwrap_or_else(|| {
        cfg.fee_pct_by_market
            .get(&ev.market)
            .copied()
            .unwrap_or(cfg.default_fee_pct)
    });

    let mut net = expected - spread - slippage - fee;
    if !net.is_finite() {
        net = 0.0;
    }
    ev.set_number("expected_edge_pct", expected);
    ev.set_number("spread_pct", spread);
    ev.set_number("slippage_pct", slippage);
    ev.set_number("fee_pct", fee);
    ev.set_number("net_edge_pct", net);
    Some(net)
}

/// Stable per-tier trims, then a global trim. Action events come first in the
/// output so the global cap bites observe events before action ones.
pub fn apply_max_events_per_run(events: Vec<Event>, cfg: &PolicyConfig) -> (Vec<Event>, usize) {
    let (mut action, mut observe): (Vec<Event>, Vec<Event>) =
        events.into_iter().partition(|e| e.tier == Tier::Action);

    let mut dropped = trim(&mut action, cfg.action_max_events_per_run)
        + trim(&mut observe, cfg.observe_max_events_per_run);

    let mut out = action;
    out.append(&mut observe);
    dropped += trim(&mut out, cfg.max_events_per_run);
    (out, dropped)
}

/// `cap == 0` means unlimited.
fn trim(xs: &mut Vec<Event>, cap: usize) -> usize {
    if cap == 0 || xs.len() <= cap {
        return 0;
    }
    let n = xs.len() - cap;
    xs.truncate(cap);
    n
}

#[derive(Debug, Default)]
pub struct DailyCapOutcome {
    pub events: Vec<Event>,
    pub downgraded: usize,
    pub dropped_observe: usize,
}

/// Daily budgets. Over-budget action events are downgraded to observe (first
/// the global action cap, then the per-signal cap); observe events over the
/// observe cap are dropped. Counters move once per admitted event, for its
/// final tier.
pub fn apply_daily_caps(
    daily: &mut DailyCounters,
    events: Vec<Event>,
    trade_date: &str,
    cfg: &PolicyConfig,
    per_signal: &HashMap<String, usize>,
) -> DailyCapOutcome {
    daily.roll_to(trade_date);
    let action_cap = cfg.action_max_events_per_day;
    let observe_cap = cfg.observe_max_events_per_day;
    let signal_cap = |source: &str| per_signal.get(source).copied().filter(|c| *c > 0);

    let mut outcome = DailyCapOutcome::default();
    for mut ev in events {
        if ev.tier == Tier::Action {
            if action_cap > 0 && daily.tier(Tier::Action) >= action_cap {
                ev.downgrade_to_observe(DowngradeReason::DailyActionCap);
                outcome.downgraded += 1;
            } else if signal_cap(&ev.source).is_some_and(|cap| daily.action_for(&ev.source) >= cap) {
                ev.downgrade_to_observe(DowngradeReason::PerSignalActionCap);
                outcome.downgraded += 1;
            }
        }

        match ev.tier {
            Tier::Observe => {
                if observe_cap > 0 && daily.tier(Tier::Observe) >= observe_cap {
                    outcome.dropped_observe += 1;
                    continue;
                }
                daily.bump_tier(Tier::Observe);
            }
            Tier::Action => {
                daily.bump_tier(Tier::Action);
                if signal_cap(&ev.source).is_some() {
                    daily.bump_action_source(&ev.source);
                }
            }
        }
        outcome.events.push(ev);
    }
    outcome
}

/// Run every stage in order over one tick's candidates.
pub fn run_pipeline(
    state: &mut EngineState,
    cfg: &PolicyConfig,
    per_signal: &HashMap<String, usize>,
    events: Vec<Event>,
    trade_date: &str,
    now: DateTime<Utc>,
) -> (Vec<Event>, PipelineStats) {
    let mut stats = PipelineStats {
        generated: events.len(),
        ..PipelineStats::default()
    };

    let (events, n) = apply_dedupe(&mut state.sent, events, cfg.dedupe_seconds, now);
    stats.deduped = n;
    let (events, n) = apply_symbol_cooldown(&mut state.symbol_last, events, cfg, now);
    stats.cooldown_dropped = n;
    let (events, n) = apply_net_edge_policy(events, cfg);
    stats.net_edge_downgraded = n;
    let (events, n) = apply_max_events_per_run(events, cfg);
    stats.run_cap_dropped = n;
    let daily = apply_daily_caps(&mut state.daily, events, trade_date, cfg, per_signal);
    stats.daily_downgraded = daily.downgraded;
    stats.daily_dropped_observe = daily.dropped_observe;
    stats.admitted = daily.events.len();

    record_metrics(&stats);
    tracing::info!(
        trade_date,
        generated = stats.generated,
        deduped = stats.deduped,
        cooldown_dropped = stats.cooldown_dropped,
        net_edge_downgraded = stats.net_edge_downgraded,
        run_cap_dropped = stats.run_cap_dropped,
        daily_downgraded = stats.daily_downgraded,
        daily_dropped_observe = stats.daily_dropped_observe,
        admitted = stats.admitted,
        "admission pipeline"
    );
    (daily.events, stats)
}

fn record_metrics(s: &PipelineStats) {
    for (stage, n) in [
        ("dedupe", s.deduped),
        ("cooldown", s.cooldown_dropped),
        ("run_cap", s.run_cap_dropped),
        ("daily_observe", s.daily_dropped_observe),
    ] {
        if n > 0 {
            counter!("radar_pipeline_dropped_total", "stage" => stage).increment(n as u64);
        }
    }
    for (reason, n) in [("net_edge", s.net_edge_downgraded), ("daily_cap", s.daily_downgraded)] {
        if n > 0 {
            counter!("radar_pipeline_downgraded_total", "reason" => reason).increment(n as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 29, 1, 30, 0).unwrap()
    }

    fn ev(source: &str, title: &str, tier: Tier) -> Event {
        Event::new(source, "20260129", title).with_tier(tier)
    }

    #[test]
    fn dedupe_drops_repeats_within_ttl_only() {
        let mut sent = TtlCache::default();
        let batch = vec![ev("a", "x", Tier::Action), ev("a", "x", Tier::Action)];
        let (out, dropped) = apply_dedupe(&mut sent, batch, 3600, t0());
        assert_eq!((out.len(), dropped), (1, 1));

        let later = t0() + ChronoDuration::seconds(3601);
        let (out, dropped) = apply_dedupe(&mut sent, vec![ev("a", "x", Tier::Action)], 3600, later);
        assert_eq!((out.len(), dropped), (1, 0));
    }

    #[test]
    fn dedupe_disabled_keeps_everything_and_records_nothing() {
        let mut sent = TtlCache::default();
        let batch = vec![ev("a", "x", Tier::Action), ev("a", "x", Tier::Action)];
        let (out, dropped) = apply_dedupe(&mut sent, batch, -1, t0());
        assert_eq!((out.len(), dropped), (2, 0));
        assert!(sent.is_empty());
    }

    #[test]
    fn cooldown_is_per_tier_source_symbol() {
        let cfg = PolicyConfig::default();
        let mut last = TtlCache::default();
        let batch = vec![
            ev("a", "1", Tier::Action).with_symbol("GC001"),
            ev("a", "2", Tier::Action).with_symbol("GC001"),
            ev("a", "3", Tier::Observe).with_symbol("GC001"),
            ev("b", "4", Tier::Action).with_symbol("GC001"),
            ev("a", "5", Tier::Action),
            ev("a", "6", Tier::Action),
        ];
        let (out, dropped) = apply_symbol_cooldown(&mut last, batch, &cfg, t0());
        assert_eq!(dropped, 1);
        let titles: Vec<_> = out.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["1", "3", "4", "5", "6"]);
    }

    #[test]
    fn net_edge_stamps_costs_and_downgrades() {
        let mut cfg = PolicyConfig {
            action_net_edge_min_pct: 0.5,
            default_spread_pct: 0.1,
            default_slippage_pct: 0.1,
            default_fee_pct: 0.3,
            ..PolicyConfig::default()
        };
        cfg.fee_pct_by_market.insert("SH".into(), 0.05);

        let batch = vec![
            ev("a", "pass", Tier::Action).with_market("SH").with_number("expected_edge_pct", 1.0),
            ev("a", "low", Tier::Action).with_number("expected_edge_pct", 0.6),
            ev("a", "missing", Tier::Action),
            ev("a", "observer", Tier::Observe).with_number("expected_edge_pct", 0.0),
        ];
        let (out, downgraded) = apply_net_edge_policy(batch, &cfg);
        assert_eq!(downgraded, 2);

        assert_eq!(out[0].tier, Tier::Action);
        assert!((out[0].number("net_edge_pct").unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(out[0].number("fee_pct"), Some(0.05));

        assert_eq!(out[1].tier, Tier::Observe);
        assert_eq!(out[1].downgrade, Some(DowngradeReason::NetEdgeBelowThreshold));
        assert_eq!(out[1].tags.get("policy").map(String::as_str), Some("net_edge"));
        assert_eq!(out[1].number("policy_action_net_edge_min_pct"), Some(0.5));

        assert_eq!(out[2].downgrade, Some(DowngradeReason::MissingExpectedEdge));
        assert_eq!(out[2].number("net_edge_pct"), None);

        assert_eq!(out[3].tier, Tier::Observe);
        assert_eq!(out[3].downgrade, None);
    }

    #[test]
    fn net_edge_without_threshold_only_stamps() {
        let cfg = PolicyConfig::default();
        let batch = vec![ev("a", "x", Tier::Action).with_number("expected_edge_pct", -3.0)];
        let (out, downgraded) = apply_net_edge_policy(batch, &cfg);
        assert_eq!(downgraded, 0);
        assert_eq!(out[0].tier, Tier::Action);
        assert_eq!(out[0].number("net_edge_pct"), Some(-3.0));
    }

    #[test]
    fn run_cap_is_stable_and_prefers_action() {
        let cfg = PolicyConfig {
            action_max_events_per_run: 2,
            observe_max_events_per_run: 3,
            max_events_per_run: 4,
            ..PolicyConfig::default()
        };
        let mut batch = Vec::new();
        for i in 0..4 {
            batch.push(ev("a", &format!("o{i}"), Tier::Observe));
            batch.push(ev("a", &format!("a{i}"), Tier::Action));
        }
        let (out, dropped) = apply_max_events_per_run(batch, &cfg);
        let titles: Vec<_> = out.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["a0", "a1", "o0", "o1"]);
        assert_eq!(dropped, 4);
    }

    #[test]
    fn run_cap_zero_is_unlimited() {
        let cfg = PolicyConfig {
            action_max_events_per_run: 0,
            observe_max_events_per_run: 0,
            max_events_per_run: 0,
            ..PolicyConfig::default()
        };
        let batch: Vec<_> = (0..80).map(|i| ev("a", &i.to_string(), Tier::Action)).collect();
        let (out, dropped) = apply_max_events_per_run(batch, &cfg);
        assert_eq!((out.len(), dropped), (80, 0));
    }

    #[test]
    fn daily_caps_downgrade_then_drop() {
        let cfg = PolicyConfig {
            action_max_events_per_day: 2,
            observe_max_events_per_day: 1,
            ..PolicyConfig::default()
        };
        let mut daily = DailyCounters::default();
        let batch: Vec<_> = (0..4).map(|i| ev("a", &i.to_string(), Tier::Action)).collect();
        let out = apply_daily_caps(&mut daily, batch, "20260129", &cfg, &HashMap::new());

        assert_eq!(out.events.len(), 3);
        assert_eq!(out.downgraded, 2);
        assert_eq!(out.dropped_observe, 1);
        assert_eq!(out.events[2].downgrade, Some(DowngradeReason::DailyActionCap));
        assert_eq!(daily.tier(Tier::Action), 2);
        assert_eq!(daily.tier(Tier::Observe), 1);
    }

    #[test]
    fn per_signal_cap_scenario() {
        let cfg = PolicyConfig {
            action_max_events_per_day: 30,
            observe_max_events_per_day: 1000,
            action_max_events_per_signal_per_day: HashMap::from([("A".to_string(), 10)]),
            ..PolicyConfig::default()
        };
        let mut daily = DailyCounters::default();
        let mut batch = Vec::new();
        for i in 0..20 {
            batch.push(ev("A", &format!("a{i}"), Tier::Action));
        }
        for i in 0..20 {
            batch.push(ev("B", &format!("b{i}"), Tier::Action));
        }
        let out = apply_daily_caps(
            &mut daily,
            batch,
            "20260129",
            &cfg,
            &cfg.action_max_events_per_signal_per_day,
        );
        let action = out.events.iter().filter(|e| e.tier == Tier::Action).count();
        let observe = out.events.iter().filter(|e| e.tier == Tier::Observe).count();
        assert_eq!((action, observe), (30, 10));
        assert!(out
            .events
            .iter()
            .filter(|e| e.tier == Tier::Observe)
            .all(|e| e.source == "A" && e.downgrade == Some(DowngradeReason::PerSignalActionCap)));
    }

    #[test]
    fn pipeline_runs_stages_in_order() {
        let cfg = PolicyConfig::default();
        let mut state = EngineState::default();
        let batch = vec![
            ev("a", "x", Tier::Action).with_symbol("S1"),
            ev("a", "x", Tier::Action).with_symbol("S1"),
            ev("a", "y", Tier::Action).with_symbol("S1"),
            ev("a", "z", Tier::Observe),
        ];
        let (out, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), batch, "20260129", t0());
        assert_eq!(stats.generated, 4);
        assert_eq!(stats.deduped, 1);
        assert_eq!(stats.cooldown_dropped, 1);
        assert_eq!(stats.admitted, 2);
        assert_eq!(out.len(), 2);
    }
}
