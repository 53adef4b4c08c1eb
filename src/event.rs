// src/event.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form numeric/text payload carried by an event.
pub type EventData = serde_json::Map<String, Value>;

/// Urgency class of an alert. Budgets are counted per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Action,
    Observe,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Action => "action",
            Tier::Observe => "observe",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action" => Ok(Tier::Action),
            "observe" => Ok(Tier::Observe),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// Why the admission pipeline moved an event from action to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DowngradeReason {
    MissingExpectedEdge,
    NetEdgeBelowThreshold,
    DailyActionCap,
    PerSignalActionCap,
}

impl DowngradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DowngradeReason::MissingExpectedEdge => "missing_expected_edge_pct",
            DowngradeReason::NetEdgeBelowThreshold => "net_edge_below_threshold",
            DowngradeReason::DailyActionCap => "daily_action_cap",
            DowngradeReason::PerSignalActionCap => "per_signal_action_cap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_expected_edge_pct" => Some(DowngradeReason::MissingExpectedEdge),
            "net_edge_below_threshold" => Some(DowngradeReason::NetEdgeBelowThreshold),
            "daily_action_cap" => Some(DowngradeReason::DailyActionCap),
            "per_signal_action_cap" => Some(DowngradeReason::PerSignalActionCap),
            _ => None,
        }
    }
}

impl fmt::Display for DowngradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DOWNGRADE_REASON_KEY: &str = "policy_downgrade_reason";

/// A candidate alert, as produced by a generator and consumed by notifiers.
///
/// Tier and downgrade reason are typed fields; on the wire they travel as
/// `tags.tier` and `data.policy_downgrade_reason` so paper logs stay flat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "WireEvent", into = "WireEvent")]
pub struct Event {
    pub source: String,
    pub trade_date: String,
    pub market: String,
    pub symbol: String,
    pub title: String,
    pub body: String,
    pub tier: Tier,
    pub downgrade: Option<DowngradeReason>,
    pub tags: BTreeMap<String, String>,
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireEvent {
    source: String,
    trade_date: String,
    market: String,
    symbol: String,
    title: String,
    body: String,
    tags: BTreeMap<String, String>,
    data: EventData,
}

impl From<WireEvent> for Event {
    fn from(mut w: WireEvent) -> Self {
        let tier = w
            .tags
            .remove("tier")
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();
        let downgrade = w
            .data
            .remove(DOWNGRADE_REASON_KEY)
            .and_then(|v| v.as_str().and_then(DowngradeReason::parse));
        Event {
            source: w.source,
            trade_date: w.trade_date,
            market: w.market,
            symbol: w.symbol,
            title: w.title,
            body: w.body,
            tier,
            downgrade,
            tags: w.tags,
            data: w.data,
        }
    }
}

impl From<Event> for WireEvent {
    fn from(ev: Event) -> Self {
        let mut tags = ev.tags;
        tags.insert("tier".to_string(), ev.tier.as_str().to_string());
        let mut data = ev.data;
        if let Some(reason) = ev.downgrade {
            data.insert(
                DOWNGRADE_REASON_KEY.to_string(),
                Value::String(reason.as_str().to_string()),
            );
        }
        WireEvent {
            source: ev.source,
            trade_date: ev.trade_date,
            market: ev.market,
            symbol: ev.symbol,
            title: ev.title,
            body: ev.body,
            tags,
            data,
        }
    }
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        trade_date: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Event {
            source: source.into(),
            trade_date: trade_date.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = market.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_number(mut self, key: &str, value: f64) -> Self {
        self.set_number(key, value);
        self
    }

    /// Content hash used for deduplication: sha256 over
    /// `source \0 trade_date \0 title \0 body`, lowercase hex.
    pub fn content_key(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.source.as_bytes());
        h.update([0u8]);
        h.update(self.trade_date.as_bytes());
        h.update([0u8]);
        h.update(self.title.as_bytes());
        h.update([0u8]);
        h.update(self.body.as_bytes());
        format!("{:x}", h.finalize())
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        data_number(&self.data, key)
    }

    /// Non-finite values are stored as JSON null.
    pub fn set_number(&mut self, key: &str, value: f64) {
        self.data.insert(key.to_string(), Value::from(value));
    }

    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        self.data.insert(key.to_string(), Value::String(value.into()));
    }

    pub fn downgrade_to_observe(&mut self, reason: DowngradeReason) {
        self.tier = Tier::Observe;
        self.downgrade = Some(reason);
    }
}

/// Numeric view of a data entry. Numbers are taken as-is, strings are parsed.
pub fn data_number(data: &EventData, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
