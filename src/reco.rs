// src/reco.rs
//! Recommendation artifact handed from the optimizer to the engine.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECO_VERSION: &str = "reco.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalQuota {
    pub signal: String,
    pub mean_reward: f64,
    pub n: u64,
    pub suggested_daily_quota: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub input_paper: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_labels: String,
    pub primary_window_sec: u64,
    pub slots: i64,
    #[serde(default)]
    pub quotas: Vec<SignalQuota>,
}

impl Recommendation {
    /// Usable quotas only: non-empty signal and a positive quota.
    pub fn usable_quotas(&self) -> impl Iterator<Item = (&str, usize)> {
        self.quotas.iter().filter_map(|q| {
            let sig = q.signal.trim();
            (!sig.is_empty() && q.suggested_daily_quota > 0)
                .then_some((sig, q.suggested_daily_quota as usize))
        })
    }
}

/// Pretty JSON with a trailing newline; parent directories are created.
pub fn write(path: &Path, r: &Recommendation) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("empty recommendation path"));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let mut body = serde_json::to_string_pretty(r).context("encode recommendation")?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read(path: &Path) -> Result<Recommendation> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}
