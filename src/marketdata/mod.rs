// src/marketdata/mod.rs
//! Market data: provider contract, fused snapshots and the consensus engine.

pub mod fusion;
pub mod providers;

pub use fusion::{Clock, FusionEngine, FusionOptions, ProviderHealth};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// One provider's quote for one symbol at one time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub rate_pct: f64,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    /// Provider payload the quote was read from, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Pass,
    #[default]
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionReason {
    ConsensusPass,
    InsufficientConsensus,
    NoValidSources,
}

impl FusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionReason::ConsensusPass => "consensus_pass",
            FusionReason::InsufficientConsensus => "insufficient_consensus",
            FusionReason::NoValidSources => "no_valid_sources",
        }
    }
}

/// Why a provider contributed nothing to a fusion call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("circuit_open")]
    CircuitOpen,
    #[error("invalid_or_stale")]
    InvalidOrStale,
    #[error("timeout")]
    Timeout,
    #[error("{0}")]
    Fetch(String),
}

impl ProviderFailure {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderFailure::CircuitOpen => "circuit_open",
            ProviderFailure::InvalidOrStale => "invalid_or_stale",
            ProviderFailure::Timeout => "timeout",
            ProviderFailure::Fetch(_) => "fetch",
        }
    }
}

impl Serialize for ProviderFailure {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResult {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
    pub stale: bool,
    pub inlier: bool,
    pub outlier: bool,
}

impl ProviderResult {
    pub fn failed(provider: &str, snapshot: Option<Snapshot>, error: ProviderFailure) -> Self {
        Self {
            provider: provider.to_string(),
            snapshot,
            error: Some(error),
            stale: false,
            inlier: false,
            outlier: false,
        }
    }
}

/// Consensus view over all providers for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub consensus_rate_pct: f64,
    pub confidence: Confidence,
    pub reason: FusionReason,
    pub provider_results: Vec<ProviderResult>,
}

impl FusionSnapshot {
    pub fn is_pass(&self) -> bool {
        self.confidence == Confidence::Pass
    }

    pub fn inlier_count(&self) -> usize {
        self.provider_results.iter().filter(|r| r.inlier).count()
    }
}

/// A market data source. Implementations must honor cancellation: the fusion
/// engine drops the future once its per-provider timeout elapses.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, symbol: &str) -> anyhow::Result<Snapshot>;
}

/// Anything that can answer "what is the consensus rate for this symbol".
/// Implemented by [`FusionEngine`]; test doubles implement it directly.
#[async_trait::async_trait]
pub trait Fusion: Send + Sync {
    async fn fetch_fusion(&self, symbol: &str) -> anyhow::Result<FusionSnapshot>;
}

/// Fixed answer for every symbol. Backs the labeler's offline mock mode.
#[derive(Debug, Clone)]
pub struct StaticFusion {
    pub rate_pct: f64,
    pub confidence: Confidence,
}

#[async_trait::async_trait]
impl Fusion for StaticFusion {
    async fn fetch_fusion(&self, symbol: &str) -> anyhow::Result<FusionSnapshot> {
        let reason = match self.confidence {
            Confidence::Pass => FusionReason::ConsensusPass,
            Confidence::Fail => FusionReason::InsufficientConsensus,
        };
        Ok(FusionSnapshot {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            consensus_rate_pct: self.rate_pct,
            confidence: self.confidence,
            reason,
            provider_results: Vec::new(),
        })
    }
}
