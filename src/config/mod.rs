// src/config/mod.rs
//! Typed configuration for the daemon and the offline tools.
//!
//! Lookup order: `$RADAR_CONFIG_PATH`, then `config/radar.toml`, then
//! `config/radar.json`. Every section has defaults, so an empty file (or no
//! file at all) is a valid configuration for the offline tools.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RadarError;
use crate::event::Tier;

pub const ENV_CONFIG_PATH: &str = "RADAR_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub engine: EngineConfig,
    pub policy: PolicyConfig,
    pub marketdata: MarketDataConfig,
    pub generators: Vec<GeneratorConfig>,
    pub notifiers: Vec<NotifierConfig>,
    pub labeler: LabelerSettings,
    pub optimizer: OptimizerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDateMode {
    #[default]
    Local,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interval_seconds: u64,
    pub trade_date_mode: TradeDateMode,
    pub fixed_trade_date: Option<String>,
    pub utc_offset_hours: i32,
    pub reco_path: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            trade_date_mode: TradeDateMode::Local,
            fixed_trade_date: None,
            utc_offset_hours: 8,
            reco_path: None,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Trade date (`YYYYMMDD`) for the tick starting at `now`.
    pub fn trade_date(&self, now: DateTime<Utc>) -> String {
        match (self.trade_date_mode, self.fixed_trade_date.as_deref()) {
            (TradeDateMode::Fixed, Some(d)) => d.trim().to_string(),
            _ => now.with_timezone(&self.offset()).format("%Y%m%d").to_string(),
        }
    }
}

/// Admission pipeline knobs. TTLs use `-1` (or `0`) to disable a stage;
/// caps use `0` for "unlimited".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub dedupe_seconds: i64,
    pub action_symbol_cooldown_seconds: i64,
    pub observe_symbol_cooldown_seconds: i64,
    pub action_net_edge_min_pct: f64,
    pub default_spread_pct: f64,
    pub default_slippage_pct: f64,
    pub default_fee_pct: f64,
    pub fee_pct_by_market: HashMap<String, f64>,
    pub max_events_per_run: usize,
    pub action_max_events_per_run: usize,
    pub observe_max_events_per_run: usize,
    pub action_max_events_per_day: usize,
    pub observe_max_events_per_day: usize,
    pub action_max_events_per_signal_per_day: HashMap<String, usize>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dedupe_seconds: 3600,
            action_symbol_cooldown_seconds: 1800,
            observe_symbol_cooldown_seconds: 7200,
            action_net_edge_min_pct: 0.0,
            default_spread_pct: 0.0,
            default_slippage_pct: 0.0,
            default_fee_pct: 0.0,
            fee_pct_by_market: HashMap::new(),
            max_events_per_run: 50,
            action_max_events_per_run: 10,
            observe_max_events_per_run: 50,
            action_max_events_per_day: 30,
            observe_max_events_per_day: 300,
            action_max_events_per_signal_per_day: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub required_sources: usize,
    pub max_abs_diff: f64,
    pub staleness_sec: u64,
    pub min_valid: f64,
    pub max_valid: f64,
    pub fail_threshold: u32,
    pub outlier_threshold: u32,
    pub cooldown_sec: u64,
    pub providers: Vec<ProviderConfig>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 1500,
            required_sources: 2,
            max_abs_diff: 0.05,
            staleness_sec: 10,
            min_valid: 0.0,
            max_valid: 20.0,
            fail_threshold: 3,
            outlier_threshold: 3,
            cooldown_sec: 120,
            providers: Vec::new(),
        }
    }
}

fn default_divisor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// GET `url` (with `{symbol}` substituted) and read the rate at a JSON pointer.
    HttpJson {
        name: String,
        url: String,
        rate_pointer: String,
        #[serde(default)]
        timestamp_pointer: Option<String>,
        #[serde(default = "default_divisor")]
        rate_divisor: f64,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Constant quote; handy for dry runs.
    Fixed { name: String, rate_pct: f64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorConfig {
    RateThreshold(RateThresholdConfig),
}

impl GeneratorConfig {
    pub fn name(&self) -> &str {
        match self {
            GeneratorConfig::RateThreshold(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateThresholdConfig {
    pub name: String,
    pub enabled: bool,
    pub tier: Tier,
    pub min_interval_seconds: u64,
    pub market: String,
    pub symbols: Vec<String>,
    pub min_rate_pct: f64,
    pub top_n: usize,
    pub confirm_k: u32,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

impl Default for RateThresholdConfig {
    fn default() -> Self {
        Self {
            name: "rate_threshold".to_string(),
            enabled: true,
            tier: Tier::Action,
            min_interval_seconds: 3,
            market: String::new(),
            symbols: Vec::new(),
            min_rate_pct: 4.0,
            top_n: 5,
            confirm_k: 1,
            window_start: None,
            window_end: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    Stdout,
    PaperLog(PaperLogConfig),
    Webhook(WebhookConfig),
    Email(EmailConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperLogConfig {
    pub path: PathBuf,
}

impl Default for PaperLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/paper.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Name of the env var holding the SMTP user (default `SMTP_USER`).
    #[serde(default = "default_user_env")]
    pub username_env: String,
    /// Name of the env var holding the SMTP password (default `SMTP_PASS`).
    #[serde(default = "default_pass_env")]
    pub password_env: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_user_env() -> String {
    "SMTP_USER".to_string()
}
fn default_pass_env() -> String {
    "SMTP_PASS".to_string()
}
fn default_subject_prefix() -> String {
    "[value-radar]".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelerSettings {
    pub windows: String,
    pub grace: String,
    pub max_per_run: usize,
    pub only_kind: Option<String>,
    /// Explicit per-source thresholds; win over generator-derived ones.
    pub thresholds: HashMap<String, f64>,
}

impl Default for LabelerSettings {
    fn default() -> Self {
        Self {
            windows: "10s,30s,5m".to_string(),
            grace: "30s".to_string(),
            max_per_run: 200,
            only_kind: None,
            thresholds: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub seed: u64,
    pub slots: i64,
    /// 0 = pick the window with the most labels.
    pub label_window_sec: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            seed: 7,
            slots: 10,
            label_window_sec: 0,
        }
    }
}

impl RadarConfig {
    /// Load from an explicit path. Supports TOML or JSON (by extension).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = Self::parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $RADAR_CONFIG_PATH
    /// 2) config/radar.toml
    /// 3) config/radar.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in ["config/radar.toml", "config/radar.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Ok(Self::default())
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        if hint_ext == "json" {
            return Ok(serde_json::from_str(s)?);
        }
        Ok(toml::from_str(s)?)
    }

    pub fn validate(&self) -> Result<(), RadarError> {
        let p = &self.policy;
        for (name, v) in [
            ("dedupe_seconds", p.dedupe_seconds),
            ("action_symbol_cooldown_seconds", p.action_symbol_cooldown_seconds),
            ("observe_symbol_cooldown_seconds", p.observe_symbol_cooldown_seconds),
        ] {
            if v < -1 {
                return Err(RadarError::config(format!("{name} must be >= -1 (got {v})")));
            }
        }
        if !(-12..=14).contains(&self.engine.utc_offset_hours) {
            return Err(RadarError::config("utc_offset_hours out of range"));
        }
        if self.engine.trade_date_mode == TradeDateMode::Fixed {
            let ok = self
                .engine
                .fixed_trade_date
                .as_deref()
                .map(str::trim)
                .is_some_and(|d| d.len() == 8 && d.chars().all(|c| c.is_ascii_digit()));
            if !ok {
                return Err(RadarError::config(
                    "trade_date_mode = \"fixed\" needs fixed_trade_date as YYYYMMDD",
                ));
            }
        }

        let md = &self.marketdata;
        if md.enabled {
            if md.providers.is_empty() {
                return Err(RadarError::NoProviders);
            }
            if md.required_sources == 0 {
                return Err(RadarError::config("required_sources must be >= 1"));
            }
            if md.max_valid <= md.min_valid {
                return Err(RadarError::config("max_valid must be greater than min_valid"));
            }
        }

        for g in &self.generators {
            match g {
                GeneratorConfig::RateThreshold(c) => {
                    if c.name.trim().is_empty() {
                        return Err(RadarError::config("generator name must not be empty"));
                    }
                    for hhmm in [&c.window_start, &c.window_end].into_iter().flatten() {
                        parse_hhmm(hhmm)?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn parse_hhmm(s: &str) -> Result<NaiveTime, RadarError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| RadarError::config(format!("bad HH:MM '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = RadarConfig::parse("", "toml").unwrap();
        assert_eq!(cfg.engine.interval_seconds, 300);
        assert_eq!(cfg.policy.dedupe_seconds, 3600);
        assert_eq!(cfg.policy.action_max_events_per_run, 10);
        assert_eq!(cfg.marketdata.required_sources, 2);
        assert!((cfg.marketdata.max_abs_diff - 0.05).abs() < 1e-12);
        assert_eq!(cfg.labeler.windows, "10s,30s,5m");
        assert_eq!(cfg.optimizer.seed, 7);
        cfg.validate().unwrap();
    }

    #[test]
    fn tagged_sections_parse() {
        let s = r#"
            [policy]
            action_net_edge_min_pct = 0.2
            action_max_events_per_signal_per_day = { repo_spike = 3 }

            [marketdata]
            enabled = true
            [[marketdata.providers]]
            type = "fixed"
            name = "paper"
            rate_pct = 3.1

            [[generators]]
            type = "rate_threshold"
            name = "repo_spike"
            symbols = ["GC001", "R-001"]
            tier = "observe"
            window_start = "09:30"

            [[notifiers]]
            type = "stdout"
            [[notifiers]]
            type = "paper_log"
        "#;
        let cfg = RadarConfig::parse(s, "toml").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.policy.action_max_events_per_signal_per_day["repo_spike"], 3);
        assert_eq!(cfg.marketdata.providers.len(), 1);
        let GeneratorConfig::RateThreshold(g) = &cfg.generators[0];
        assert_eq!(g.tier, Tier::Observe);
        assert_eq!(g.min_rate_pct, 4.0);
        assert!(matches!(cfg.notifiers[0], NotifierConfig::Stdout));
        match &cfg.notifiers[1] {
            NotifierConfig::PaperLog(p) => assert_eq!(p.path, PathBuf::from("state/paper.jsonl")),
            other => panic!("unexpected notifier {other:?}"),
        }
    }

    #[test]
    fn unknown_notifier_type_is_rejected() {
        let s = r#"
            [[notifiers]]
            type = "carrier_pigeon"
        "#;
        assert!(RadarConfig::parse(s, "toml").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = RadarConfig::default();
        cfg.policy.dedupe_seconds = -5;
        assert!(matches!(cfg.validate(), Err(RadarError::Configuration(_))));

        let mut cfg = RadarConfig::default();
        cfg.marketdata.enabled = true;
        assert!(matches!(cfg.validate(), Err(RadarError::NoProviders)));

        let mut cfg = RadarConfig::default();
        cfg.engine.trade_date_mode = TradeDateMode::Fixed;
        assert!(cfg.validate().is_err());
        cfg.engine.fixed_trade_date = Some("20260129".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn local_trade_date_uses_offset() {
        let cfg = EngineConfig::default();
        // 20:00 UTC is already the next day at UTC+8.
        let now = Utc.with_ymd_and_hms(2026, 1, 28, 20, 0, 0).unwrap();
        assert_eq!(cfg.trade_date(now), "20260129");

        let fixed = EngineConfig {
            trade_date_mode: TradeDateMode::Fixed,
            fixed_trade_date: Some("20250102".into()),
            ..EngineConfig::default()
        };
        assert_eq!(fixed.trade_date(now), "20250102");
    }
}
