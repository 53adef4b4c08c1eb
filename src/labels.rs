// src/labels.rs
//! Delayed-reward labels: the append-only JSONL written by the labeler and
//! read back (as an index) by the labeler itself and by the optimizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::marketdata::Confidence;
use crate::paper::for_each_line;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub event_id: String,
    pub event_ts: DateTime<Utc>,
    pub source: String,
    pub symbol: String,
    pub trade_date: String,
    pub window_sec: u64,
    pub grace_sec: u64,
    pub late_by_sec: u64,
    pub threshold: f64,
    pub entry_rate_pct: f64,
    pub exit_rate_pct: f64,
    pub confidence: Confidence,
    pub reward: u8,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LabelsIndex {
    /// event_id → window_sec → label. The last line for a pair wins.
    pub by_event: HashMap<String, BTreeMap<u64, Label>>,
    /// Sorted unique windows.
    pub windows: Vec<u64>,
    pub count_by_window: BTreeMap<u64, usize>,
    pub total: usize,
    pub warnings: Vec<String>,
}

impl LabelsIndex {
    pub fn read<R: BufRead>(r: R) -> io::Result<Self> {
        let mut idx = LabelsIndex::default();
        for_each_line(r, |line_no, line| {
            let Some(label) = line.and_then(|s| serde_json::from_str::<Label>(s).ok()) else {
                idx.warnings.push(format!("invalid_label_json line={line_no}"));
                return;
            };
            if label.event_id.is_empty() || label.window_sec == 0 {
                idx.warnings.push(format!("invalid_label_fields line={line_no}"));
                return;
            }
            *idx.count_by_window.entry(label.window_sec).or_insert(0) += 1;
            idx.total += 1;
            idx.by_event
                .entry(label.event_id.clone())
                .or_default()
                .insert(label.window_sec, label);
        })?;
        idx.windows = idx.count_by_window.keys().copied().collect();
        Ok(idx)
    }

    pub fn read_path(path: &Path) -> io::Result<Self> {
        Self::read(BufReader::new(File::open(path)?))
    }

    /// Like `read_path`, but a missing file is an empty index.
    pub fn read_path_or_empty(path: &Path) -> io::Result<Self> {
        match File::open(path) {
            Ok(f) => Self::read(BufReader::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, event_id: &str, window_sec: u64) -> Option<&Label> {
        self.by_event.get(event_id)?.get(&window_sec)
    }

    pub fn has(&self, event_id: &str, window_sec: u64) -> bool {
        self.get(event_id, window_sec).is_some()
    }

    /// The window with the most labels (the shorter one on ties); 0 when empty.
    pub fn default_primary_window_sec(&self) -> u64 {
        let mut best = (0u64, 0usize);
        for (w, n) in &self.count_by_window {
            if *n > best.1 {
                best = (*w, *n);
            }
        }
        best.0
    }
}
