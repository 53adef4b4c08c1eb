// src/lib.rs
// Public library surface for the daemon, the offline tools and integration tests.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod telemetry;

// Live path: fused market data → generators → admission → delivery
pub mod engine;
pub mod generators;
pub mod marketdata;
pub mod notify;

// Offline loop: paper log → labels → optimizer → reco
pub mod labeler;
pub mod labels;
pub mod optimizer;
pub mod paper;
pub mod reco;

pub use crate::config::RadarConfig;
pub use crate::engine::Engine;
pub use crate::error::RadarError;
pub use crate::event::{Event, Tier};
