// src/engine/reco_loader.rs
//! Per-signal daily quotas from the optimizer's recommendation file.
//!
//! The file is re-read whenever its modified time changes. A missing or
//! unreadable file never stops the engine: the previous quotas (or the
//! static config) stay in force.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::reco;

#[derive(Debug, Default)]
pub struct RecoOverrides {
    path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
    quotas: HashMap<String, usize>,
}

impl RecoOverrides {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            ..Self::default()
        }
    }

    /// Current quotas; empty when nothing usable was loaded.
    pub fn quotas(&self) -> &HashMap<String, usize> {
        &self.quotas
    }

    /// Reload if the file's mtime changed. Returns true when new quotas were adopted.
    pub fn refresh(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            return false;
        };
        let mtime = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                if self.last_modified.is_none() {
                    tracing::warn!(path = %path.display(), error = %e, "reco file not available");
                    // Remember the miss so we don't warn every tick.
                    self.last_modified = Some(SystemTime::UNIX_EPOCH);
                }
                return false;
            }
        };
        if self.last_modified == Some(mtime) {
            return false;
        }
        self.last_modified = Some(mtime);

        let r = match reco::read(&path) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "reco load failed");
                return false;
            }
        };
        let quotas: HashMap<String, usize> = r
            .usable_quotas()
            .map(|(sig, q)| (sig.to_string(), q))
            .collect();
        if quotas.is_empty() {
            tracing::warn!(path = %path.display(), "reco loaded but no quotas found");
            return false;
        }
        tracing::info!(
            path = %path.display(),
            quotas = quotas.len(),
            window_sec = r.primary_window_sec,
            "reco loaded"
        );
        self.quotas = quotas;
        true
    }

    /// Recommendation quotas replace the static per-signal map wholesale
    /// whenever any are present.
    pub fn effective<'a>(
        &'a self,
        static_caps: &'a HashMap<String, usize>,
    ) -> &'a HashMap<String, usize> {
        if self.quotas.is_empty() {
            static_caps
        } else {
            &self.quotas
        }
    }
}
