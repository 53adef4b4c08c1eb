// tests/pipeline.rs
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;

use value_radar::config::PolicyConfig;
use value_radar::engine::{run_pipeline, EngineState};
use value_radar::event::DowngradeReason;
use value_radar::{Event, Tier};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 29, 2, 0, 0).unwrap()
}

fn spike(trade_date: &str, symbol: &str, edge: f64) -> Event {
    Event::new("repo_spike", trade_date, format!("{symbol} above threshold"))
        .with_symbol(symbol)
        .with_market("SH")
        .with_number("expected_edge_pct", edge)
}

#[test]
fn daily_budget_resets_on_new_trade_date() {
    let cfg = PolicyConfig {
        action_max_events_per_day: 1,
        ..PolicyConfig::default()
    };
    let mut state = EngineState::default();

    let day1 = vec![spike("20260129", "GC001", 1.0), spike("20260129", "GC002", 1.0)];
    let (out, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), day1, "20260129", t0());
    assert_eq!(stats.daily_downgraded, 1);
    assert_eq!(out[0].tier, Tier::Action);
    assert_eq!(out[1].tier, Tier::Observe);
    assert_eq!(out[1].downgrade, Some(DowngradeReason::DailyActionCap));

    let next = t0() + Duration::days(1);
    let day2 = vec![spike("20260130", "GC003", 1.0)];
    let (out, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), day2, "20260130", next);
    assert_eq!(stats.daily_downgraded, 0);
    assert_eq!(out[0].tier, Tier::Action);
    assert_eq!(state.daily.trade_date(), "20260130");
    assert_eq!(state.daily.tier(Tier::Action), 1);
}

#[test]
fn downgraded_events_carry_their_reason_on_the_wire() {
    let cfg = PolicyConfig {
        action_net_edge_min_pct: 0.5,
        default_fee_pct: 0.2,
        ..PolicyConfig::default()
    };
    let mut state = EngineState::default();
    let batch = vec![spike("20260129", "GC001", 0.6), spike("20260129", "GC002", 2.0)];
    let (out, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), batch, "20260129", t0());
    assert_eq!(stats.net_edge_downgraded, 1);
    // The run cap orders action events first.
    assert_eq!(out[0].symbol, "GC002");
    assert_eq!(out[1].symbol, "GC001");

    let wire = serde_json::to_value(&out[1]).unwrap();
    assert_eq!(wire["tags"]["tier"], "observe");
    assert_eq!(wire["data"]["policy_downgrade_reason"], "net_edge_below_threshold");
    assert!((wire["data"]["net_edge_pct"].as_f64().unwrap() - 0.4).abs() < 1e-9);

    let back: Event = serde_json::from_value(wire).unwrap();
    assert_eq!(back, out[1]);

    let wire = serde_json::to_value(&out[0]).unwrap();
    assert_eq!(wire["tags"]["tier"], "action");
    assert!(wire["data"].get("policy_downgrade_reason").is_none());
}

#[test]
fn cooldown_outlives_a_single_tick() {
    let cfg = PolicyConfig {
        dedupe_seconds: -1,
        ..PolicyConfig::default()
    };
    let mut state = EngineState::default();
    let (out, _) = run_pipeline(
        &mut state,
        &cfg,
        &HashMap::new(),
        vec![spike("20260129", "GC001", 1.0)],
        "20260129",
        t0(),
    );
    assert_eq!(out.len(), 1);

    // Same symbol and source 10 minutes later: inside the 30 minute action cooldown.
    let (out, stats) = run_pipeline(
        &mut state,
        &cfg,
        &HashMap::new(),
        vec![spike("20260129", "GC001", 1.5)],
        "20260129",
        t0() + Duration::minutes(10),
    );
    assert!(out.is_empty());
    assert_eq!(stats.cooldown_dropped, 1);

    let (out, _) = run_pipeline(
        &mut state,
        &cfg,
        &HashMap::new(),
        vec![spike("20260129", "GC001", 1.5)],
        "20260129",
        t0() + Duration::minutes(31),
    );
    assert_eq!(out.len(), 1);
}

#[test]
fn same_batch_twice_within_ttl_admits_nothing() {
    let cfg = PolicyConfig::default();
    let mut state = EngineState::default();
    let batch = || vec![spike("20260129", "GC001", 1.0), spike("20260129", "GC002", 1.0)];

    let (first, _) = run_pipeline(&mut state, &cfg, &HashMap::new(), batch(), "20260129", t0());
    assert_eq!(first.len(), 2);

    let later = t0() + Duration::minutes(5);
    let (second, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), batch(), "20260129", later);
    assert!(second.is_empty());
    assert_eq!(stats.deduped, 2);
}

#[test]
fn over_cap_actions_fall_through_to_observe_budget() {
    let cfg = PolicyConfig {
        action_max_events_per_day: 1,
        observe_max_events_per_day: 2,
        dedupe_seconds: -1,
        action_symbol_cooldown_seconds: -1,
        ..PolicyConfig::default()
    };
    let mut state = EngineState::default();
    let batch: Vec<Event> = (1..=5)
        .map(|i| spike("20260129", &format!("GC00{i}"), 1.0))
        .collect();
    let (out, stats) = run_pipeline(&mut state, &cfg, &HashMap::new(), batch, "20260129", t0());

    // One action, then downgrades until the observe budget is gone; the rest
    // are dropped as observe events.
    assert_eq!(stats.daily_downgraded, 4);
    assert_eq!(stats.daily_dropped_observe, 2);
    assert_eq!(stats.admitted, 3);
    let tiers: Vec<Tier> = out.iter().map(|e| e.tier).collect();
    assert_eq!(tiers, vec![Tier::Action, Tier::Observe, Tier::Observe]);
    assert_eq!(state.daily.tier(Tier::Action), 1);
    assert_eq!(state.daily.tier(Tier::Observe), 2);
}
