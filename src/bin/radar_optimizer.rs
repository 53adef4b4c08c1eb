//! Offline Thompson-sampling optimizer: Markdown report on stdout, optional
//! report file and recommendation JSON for the engine.
//!
//! Inputs come from the config file plus `OPTIMIZER_*` environment overrides.
//! `OPTIMIZER_IN=-` reads the paper log from stdin.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use value_radar::config::RadarConfig;
use value_radar::labels::LabelsIndex;
use value_radar::optimizer::{self, load_labels, OptimizerInput};
use value_radar::paper::{read_jsonl, read_jsonl_path};
use value_radar::reco;
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

fn write_report(path: &Path, md: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    fs::write(path, md).with_context(|| format!("write {}", path.display()))
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RadarConfig::load_default().context("load config")?;
    let input = env_opt("OPTIMIZER_IN").ok_or_else(|| anyhow!("OPTIMIZER_IN is required ('-' for stdin)"))?;
    let labels_path = env_opt("OPTIMIZER_LABELS").unwrap_or_default();
    let label_window_sec = parse_env::<u64>("OPTIMIZER_LABEL_WINDOW_SEC")?.unwrap_or(cfg.optimizer.label_window_sec);
    let seed = parse_env::<u64>("OPTIMIZER_SEED")?.unwrap_or(cfg.optimizer.seed);
    let slots = parse_env::<i64>("OPTIMIZER_SLOTS")?.unwrap_or(cfg.optimizer.slots);

    let (input_label, (rows, paper_warnings)) = if input == "-" {
        let rows = read_jsonl(io::stdin().lock()).context("read paper log from stdin")?;
        ("<stdin>".to_string(), rows)
    } else {
        let rows = read_jsonl_path(Path::new(&input)).with_context(|| format!("read paper log {input}"))?;
        (input.clone(), rows)
    };
    if !paper_warnings.is_empty() {
        tracing::warn!(count = paper_warnings.len(), "paper log warnings");
    }

    let labels = if labels_path.is_empty() {
        LabelsIndex::default()
    } else {
        load_labels(Path::new(&labels_path))?
    };

    let out = optimizer::run(&OptimizerInput {
        rows,
        paper_warnings,
        input_label,
        labels_path,
        labels,
        label_window_sec,
        seed,
        slots,
        now: Utc::now(),
    })?;

    let md = out.report.render_markdown();
    print!("{md}");

    if let Some(p) = env_opt("OPTIMIZER_OUT_MD").map(PathBuf::from) {
        write_report(&p, &md)?;
    }
    if let Some(p) = env_opt("OPTIMIZER_OUT_RECO").map(PathBuf::from) {
        reco::write(&p, &out.recommendation)?;
        tracing::info!(path = %p.display(), quotas = out.recommendation.quotas.len(), "reco written");
    }
    Ok(())
}
