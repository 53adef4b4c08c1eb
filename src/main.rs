//! value-radar daemon: polls fused market data through the configured
//! generators, admits alerts through the budgeted pipeline and delivers them.
//!
//! Configuration lookup and sections are described in `config/radar.example.toml`.

use anyhow::{Context, Result};
use value_radar::config::RadarConfig;
use value_radar::metrics::Metrics;
use value_radar::telemetry::init_tracing;
use value_radar::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = RadarConfig::load_default().context("load config")?;

    if let Some(addr) = config.engine.metrics_addr.clone() {
        let metrics = Metrics::init()?;
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&addr).await {
                tracing::warn!(error = %format!("{e:#}"), "metrics endpoint stopped");
            }
        });
    } else {
        value_radar::metrics::ensure_described();
    }

    let mut engine = Engine::from_config(config)?;
    engine.run().await
}
