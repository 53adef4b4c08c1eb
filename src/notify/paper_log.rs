// src/notify/paper_log.rs
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::Notifier;
use crate::event::Event;
use crate::paper::PaperRowRef;

/// Append-only JSONL record of every delivered event: `{"ts": ..., "event": ...}`.
pub struct PaperLogNotifier {
    path: PathBuf,
}

impl PaperLogNotifier {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Notifier for PaperLogNotifier {
    fn name(&self) -> &str {
        "paper_log"
    }

    async fn notify(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }

        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut buf = Vec::new();
        for ev in events {
            serde_json::to_writer(&mut buf, &PaperRowRef { ts: &ts, event: ev })
                .context("encode paper row")?;
            buf.push(b'\n');
        }

        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        f.write_all(&buf)
            .await
            .with_context(|| format!("append {}", self.path.display()))?;
        f.flush().await.context("flush paper log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tier;
    use crate::paper::read_jsonl_path;

    #[tokio::test]
    async fn appends_rows_that_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/paper.jsonl");
        let n = PaperLogNotifier::new(&path);

        let a = Event::new("repo", "20260129", "a").with_symbol("GC001");
        let b = Event::new("repo", "20260129", "b").with_tier(Tier::Observe);
        n.notify(&[a.clone()]).await.unwrap();
        n.notify(&[b.clone()]).await.unwrap();
        n.notify(&[]).await.unwrap();

        let (rows, warnings) = read_jsonl_path(&path).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event, a);
        assert_eq!(rows[1].event.tier, Tier::Observe);
        assert!(rows[0].ts.ends_with('Z'));
    }
}
