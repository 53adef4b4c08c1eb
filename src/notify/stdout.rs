use anyhow::Result;

use super::{format_event, Notifier};
use crate::event::Event;

pub struct StdoutNotifier;

#[async_trait::async_trait]
impl Notifier for StdoutNotifier {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn notify(&self, events: &[Event]) -> Result<()> {
        for ev in events {
            println!("{}", format_event(ev));
            println!("{}", "-".repeat(60));
        }
        Ok(())
    }
}
