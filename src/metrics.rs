use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("radar_fusion_requests_total", "Fusion calls issued.");
        describe_counter!(
            "radar_fusion_provider_failures_total",
            "Provider results that contributed no quote, by provider and kind."
        );
        describe_counter!(
            "radar_fusion_circuit_trips_total",
            "Times a provider was disabled by the circuit breaker."
        );
        describe_counter!(
            "radar_pipeline_dropped_total",
            "Events dropped by the admission pipeline, by stage."
        );
        describe_counter!(
            "radar_pipeline_downgraded_total",
            "Action events downgraded to observe, by reason."
        );
        describe_counter!(
            "radar_events_delivered_total",
            "Events handed to notifiers after admission."
        );
        describe_counter!("radar_notifier_errors_total", "Failed notifier deliveries.");
        describe_counter!("radar_generator_errors_total", "Failed generator evaluations.");
        describe_gauge!(
            "radar_engine_last_tick_ts",
            "Unix ts when the engine last completed a tick."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    /// Serve `/metrics` on `addr` until the task is dropped.
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind metrics listener on {addr}"))?;
        tracing::info!(%addr, "serving /metrics");
        axum::serve(listener, self.router())
            .await
            .context("metrics server")?;
        Ok(())
    }
}
