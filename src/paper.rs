// src/paper.rs
//! Paper log rows: the append-only JSONL record of delivered events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PaperRow {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub event: Event,
}

/// Borrowed form used when appending.
#[derive(Serialize)]
pub struct PaperRowRef<'a> {
    pub ts: &'a str,
    pub event: &'a Event,
}

/// Walk a JSONL stream, handing each non-blank line (BOM and surrounding
/// whitespace stripped) to `f` with its 1-based line number. Lines that are
/// not valid UTF-8 are passed as `None`.
pub(crate) fn for_each_line<R, F>(mut r: R, mut f: F) -> io::Result<()>
where
    R: BufRead,
    F: FnMut(usize, Option<&str>),
{
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        if r.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        line_no += 1;
        match std::str::from_utf8(&buf) {
            Ok(s) => {
                let s = s.trim().trim_start_matches('\u{feff}').trim();
                if !s.is_empty() {
                    f(line_no, Some(s));
                }
            }
            Err(_) => f(line_no, None),
        }
    }
}

/// Parse paper rows. Malformed lines and rows without a source become
/// warnings (`invalid_json line=N`, `missing_event_source line=N`).
pub fn read_jsonl<R: BufRead>(r: R) -> io::Result<(Vec<PaperRow>, Vec<String>)> {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for_each_line(r, |line_no, line| {
        let parsed = line.and_then(|s| serde_json::from_str::<PaperRow>(s).ok());
        match parsed {
            None => warnings.push(format!("invalid_json line={line_no}")),
            Some(row) if row.event.source.trim().is_empty() => {
                warnings.push(format!("missing_event_source line={line_no}"))
            }
            Some(row) => rows.push(row),
        }
    })?;
    Ok((rows, warnings))
}

pub fn read_jsonl_path(path: &Path) -> io::Result<(Vec<PaperRow>, Vec<String>)> {
    read_jsonl(BufReader::new(File::open(path)?))
}

/// Stable id of a paper row: sha256 of `ts|source|symbol|trade_date|title`, hex.
pub fn event_id(row: &PaperRow) -> String {
    let ev = &row.event;
    let joined = [
        row.ts.as_str(),
        ev.source.as_str(),
        ev.symbol.as_str(),
        ev.trade_date.as_str(),
        ev.title.as_str(),
    ]
    .join("|");
    format!("{:x}", Sha256::digest(joined.as_bytes()))
}

/// Inline reward carried by the row itself (`data.reward`), as 0/1.
pub fn reward_from_row(row: &PaperRow) -> Option<u8> {
    match row.event.data.get("reward")? {
        Value::Number(n) => Some(u8::from(n.as_f64()? > 0.0)),
        Value::Bool(b) => Some(u8::from(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => Some(1),
            "0" | "false" | "no" | "n" => Some(0),
            _ => None,
        },
        _ => None,
    }
}
