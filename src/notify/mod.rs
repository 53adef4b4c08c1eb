// src/notify/mod.rs
//! Delivery of admitted events. Every notifier receives the same batch; one
//! notifier failing never blocks the others.

pub mod email;
pub mod paper_log;
pub mod stdout;
pub mod webhook;

pub use email::EmailNotifier;
pub use paper_log::PaperLogNotifier;
pub use stdout::StdoutNotifier;
pub use webhook::WebhookNotifier;

use anyhow::Result;
use metrics::counter;

use crate::config::NotifierConfig;
use crate::error::RadarError;
use crate::event::Event;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, events: &[Event]) -> Result<()>;
}

pub fn build_notifiers(cfgs: &[NotifierConfig]) -> Result<Vec<Box<dyn Notifier>>, RadarError> {
    let mut out: Vec<Box<dyn Notifier>> = Vec::with_capacity(cfgs.len());
    for c in cfgs {
        match c {
            NotifierConfig::Stdout => out.push(Box::new(StdoutNotifier)),
            NotifierConfig::PaperLog(pc) => out.push(Box::new(PaperLogNotifier::new(&pc.path))),
            NotifierConfig::Webhook(wc) => out.push(Box::new(WebhookNotifier::from_config(wc)?)),
            NotifierConfig::Email(ec) => out.push(Box::new(EmailNotifier::from_config(ec)?)),
        }
    }
    if out.is_empty() {
        return Err(RadarError::config("no notifiers configured"));
    }
    Ok(out)
}

/// Hand `events` to every notifier in order. Returns the number of failures.
pub async fn deliver(notifiers: &[Box<dyn Notifier>], events: &[Event]) -> usize {
    if events.is_empty() {
        return 0;
    }
    let mut failures = 0usize;
    for n in notifiers {
        if let Err(e) = n.notify(events).await {
            failures += 1;
            counter!("radar_notifier_errors_total").increment(1);
            tracing::warn!(notifier = n.name(), error = %format!("{e:#}"), "notifier error");
        }
    }
    counter!("radar_events_delivered_total").increment(events.len() as u64);
    failures
}

/// Human-readable rendering shared by the text notifiers.
pub fn format_event(ev: &Event) -> String {
    let mut out = format!("[{}] {}", ev.tier, ev.title);
    if !ev.symbol.is_empty() {
        out.push_str(&format!("\nsymbol: {}", ev.symbol));
    }
    out.push_str(&format!("\nsource: {}  trade_date: {}", ev.source, ev.trade_date));
    if let Some(reason) = ev.downgrade {
        out.push_str(&format!("\ndowngraded: {reason}"));
    }
    if let Some(net) = ev.number("net_edge_pct") {
        out.push_str(&format!("\nnet_edge_pct: {net:.4}"));
    }
    if !ev.body.trim().is_empty() {
        out.push('\n');
        out.push_str(ev.body.trim_end());
    }
    out
}
