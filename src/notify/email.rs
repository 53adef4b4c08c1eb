use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{format_event, Notifier};
use crate::config::EmailConfig;
use crate::error::RadarError;
use crate::event::{Event, Tier};

/// One digest mail per delivered batch.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject_prefix: String,
}

impl EmailNotifier {
    pub fn from_config(c: &EmailConfig) -> Result<Self, RadarError> {
        let from = c
            .from
            .parse::<Mailbox>()
            .map_err(|e| RadarError::config(format!("invalid from address: {e}")))?;
        let to = c
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| RadarError::config(format!("invalid to address {addr}: {e}")))
            })
            .collect::<Result<Vec<Mailbox>, _>>()?;
        if to.is_empty() {
            return Err(RadarError::config("email notifier needs at least one recipient"));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&c.host)
            .map_err(|e| RadarError::config(format!("invalid SMTP host {}: {e}", c.host)))?;
        if let Some(port) = c.port {
            builder = builder.port(port);
        }
        // Credentials only when both env vars are set.
        if let (Ok(user), Ok(pass)) = (std::env::var(&c.username_env), std::env::var(&c.password_env)) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
            subject_prefix: c.subject_prefix.clone(),
        })
    }
}

pub fn digest_subject(prefix: &str, events: &[Event]) -> String {
    let action = events.iter().filter(|e| e.tier == Tier::Action).count();
    let trade_date = events.first().map(|e| e.trade_date.as_str()).unwrap_or("");
    format!(
        "{prefix} {} alert(s), {action} action ({trade_date})",
        events.len()
    )
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, events: &[Event]) -> Result<()> {
        let body = events
            .iter()
            .map(format_event)
            .collect::<Vec<_>>()
            .join(&format!("\n{}\n", "-".repeat(60)));

        let mut msg = Message::builder()
            .from(self.from.clone())
            .subject(digest_subject(&self.subject_prefix, events))
            .header(header::ContentType::TEXT_PLAIN);
        for to in &self.to {
            msg = msg.to(to.clone());
        }
        let msg = msg.body(body).context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
