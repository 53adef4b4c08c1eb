// src/marketdata/providers.rs
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FusionEngine, FusionOptions, Provider, Snapshot};
use crate::config::{MarketDataConfig, ProviderConfig};
use crate::error::RadarError;

/// Generic JSON quote endpoint.
pub struct HttpJsonProvider {
    name: String,
    client: reqwest::Client,
    url_template: String,
    rate_pointer: String,
    timestamp_pointer: Option<String>,
    rate_divisor: f64,
    headers: BTreeMap<String, String>,
}

impl HttpJsonProvider {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        rate_pointer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            url_template: url_template.into(),
            rate_pointer: rate_pointer.into(),
            timestamp_pointer: None,
            rate_divisor: 1.0,
            headers: BTreeMap::new(),
        }
    }

    fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace("{symbol}", symbol)
    }
}

#[async_trait::async_trait]
impl Provider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, symbol: &str) -> Result<Snapshot> {
        let mut req = self.client.get(self.url_for(symbol));
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let body: Value = req
            .send()
            .await
            .with_context(|| format!("{} request", self.name))?
            .error_for_status()
            .with_context(|| format!("{} status", self.name))?
            .json()
            .await
            .with_context(|| format!("{} body", self.name))?;
        self.snapshot_from_body(symbol, body)
    }
}

impl HttpJsonProvider {
    fn snapshot_from_body(&self, symbol: &str, body: Value) -> Result<Snapshot> {
        let rate_pct = extract_number(&body, &self.rate_pointer)
            .ok_or_else(|| anyhow!("no numeric rate at {}", self.rate_pointer))?
            / self.rate_divisor;
        let timestamp = self
            .timestamp_pointer
            .as_deref()
            .and_then(|ptr| extract_number(&body, ptr))
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(Utc::now);

        Ok(Snapshot {
            symbol: symbol.to_string(),
            rate_pct,
            timestamp,
            provider: self.name.clone(),
            raw: raw_fields(body),
        })
    }
}

/// Object payloads are kept as-is; anything else lands under `body`.
fn raw_fields(body: Value) -> Map<String, Value> {
    match body {
        Value::Object(m) => m,
        other => Map::from_iter([("body".to_string(), other)]),
    }
}

/// Always answers with the same rate, stamped with the current time.
pub struct FixedRateProvider {
    name: String,
    rate_pct: f64,
}

impl FixedRateProvider {
    pub fn new(name: impl Into<String>, rate_pct: f64) -> Self {
        Self {
            name: name.into(),
            rate_pct,
        }
    }
}

#[async_trait::async_trait]
impl Provider for FixedRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, symbol: &str) -> Result<Snapshot> {
        Ok(Snapshot {
            symbol: symbol.to_string(),
            rate_pct: self.rate_pct,
            timestamp: Utc::now(),
            provider: self.name.clone(),
            raw: Map::new(),
        })
    }
}

/// Number at a JSON pointer; numeric strings are accepted.
pub fn extract_number(v: &Value, pointer: &str) -> Option<f64> {
    match v.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn build_providers(cfg: &MarketDataConfig) -> Result<Vec<Arc<dyn Provider>>, RadarError> {
    let mut out: Vec<Arc<dyn Provider>> = Vec::with_capacity(cfg.providers.len());
    for p in &cfg.providers {
        match p {
            ProviderConfig::HttpJson {
                name,
                url,
                rate_pointer,
                timestamp_pointer,
                rate_divisor,
                headers,
            } => {
                if *rate_divisor == 0.0 {
                    return Err(RadarError::config(format!("provider {name}: rate_divisor is 0")));
                }
                let mut hp = HttpJsonProvider::new(name, url, rate_pointer);
                hp.timestamp_pointer = timestamp_pointer.clone();
                hp.rate_divisor = *rate_divisor;
                hp.headers = headers.clone();
                out.push(Arc::new(hp));
            }
            ProviderConfig::Fixed { name, rate_pct } => {
                out.push(Arc::new(FixedRateProvider::new(name, *rate_pct)));
            }
        }
    }
    Ok(out)
}

/// `None` when market data is disabled.
pub fn build_fusion(cfg: &MarketDataConfig) -> Result<Option<Arc<FusionEngine>>, RadarError> {
    if !cfg.enabled {
        return Ok(None);
    }
    let providers = build_providers(cfg)?;
    let engine = FusionEngine::new(providers, FusionOptions::from(cfg))?;
    Ok(Some(Arc::new(engine)))
}
