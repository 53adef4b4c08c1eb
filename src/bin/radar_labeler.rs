//! One delayed-reward labeling pass over the paper log.
//!
//! Inputs come from the config file plus `LABELER_*` environment overrides.
//! `LABELER_MOCK_RATE` swaps the live fusion engine for a constant reading.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use value_radar::config::RadarConfig;
use value_radar::labeler::{thresholds_from_config, Labeler, LabelerConfig};
use value_radar::marketdata::{providers::build_fusion, Confidence, Fusion, StaticFusion};
use value_radar::telemetry::init_tracing;

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    env_opt(name)
        .map(|v| v.parse::<T>().map_err(|_| anyhow!("{name}: cannot parse '{v}'")))
        .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = RadarConfig::load_default().context("load config")?;
    let paper = env_opt("LABELER_IN")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("LABELER_IN is required (paper log path)"))?;
    let out = env_opt("LABELER_OUT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("state/labels.jsonl"));
    if let Some(w) = env_opt("LABELER_WINDOWS") {
        cfg.labeler.windows = w;
    }
    if let Some(g) = env_opt("LABELER_GRACE") {
        cfg.labeler.grace = g;
    }
    if let Some(m) = parse_env::<usize>("LABELER_MAX")? {
        cfg.labeler.max_per_run = m;
    }

    let fusion: Option<Arc<dyn Fusion>> = match parse_env::<f64>("LABELER_MOCK_RATE")? {
        Some(rate) => {
            let confidence = match env_opt("LABELER_MOCK_CONFIDENCE") {
                Some(c) if c.eq_ignore_ascii_case("fail") => Confidence::Fail,
                _ => Confidence::Pass,
            };
            tracing::info!(rate, ?confidence, "using mock fusion");
            Some(Arc::new(StaticFusion {
                rate_pct: rate,
                confidence,
            }) as Arc<dyn Fusion>)
        }
        None => build_fusion(&cfg.marketdata)
            .context("init marketdata")?
            .map(|f| f as Arc<dyn Fusion>),
    };

    let lcfg = LabelerConfig::from_settings(&cfg.labeler).context("labeler settings")?;
    let labeler = Labeler::new(fusion, lcfg, thresholds_from_config(&cfg));
    let stats = labeler.run_once(&paper, &out).await?;

    println!(
        "labels_written={} skipped={} out={}",
        stats.written,
        stats.skipped,
        out.display()
    );
    Ok(())
}
