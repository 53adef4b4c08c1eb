// src/error.rs
use thiserror::Error;

/// Library-level failures. Everything here is surfaced at construction or at
/// the edges of an offline run; per-tick failures are logged and absorbed.
#[derive(Debug, Error)]
pub enum RadarError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fusion engine needs at least one provider")]
    NoProviders,

    #[error("slots must be > 0 (got {0})")]
    InvalidSlots(i64),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RadarError {
    pub fn config(msg: impl Into<String>) -> Self {
        RadarError::Configuration(msg.into())
    }
}
