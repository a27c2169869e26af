//! Outgoing mail
//!
//! Password recovery only needs "send this text to that address". Delivery
//! failures are logged by the caller and never reach the HTTP client.

use async_trait::async_trait;
use tracing::info;

use flightlog_common::config::SmtpConfig;
use flightlog_common::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<()>;
}

/// Writes messages to the `mail` log target instead of a relay
///
/// Only `from`, `host` and `port` are taken from [`SmtpConfig`]; credentials
/// stay unused until a relay transport exists.
pub struct LogMailer {
    from: String,
    relay: String,
}

impl LogMailer {
    pub fn new(config: &SmtpConfig) -> Self {
        Self {
            from: config.from.clone(),
            relay: format!("{}:{}", config.host, config.port),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<()> {
        info!(
            target: "mail",
            from = %self.from,
            relay = %self.relay,
            to = %message.to,
            subject = %message.subject,
            "{}",
            message.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_reports_configured_relay() {
        let config = SmtpConfig {
            host: "smtp.example.org".into(),
            port: 2525,
            user: "ops".into(),
            password: "secret".into(),
            from: "ops@example.org".into(),
            ..Default::default()
        };
        let mailer = LogMailer::new(&config);
        assert_eq!(mailer.relay, "smtp.example.org:2525");
        assert_eq!(mailer.from, "ops@example.org");

        let message = MailMessage {
            to: "crew@example.org".into(),
            subject: "Password reset".into(),
            body: "link".into(),
        };
        assert!(mailer.send(message).await.is_ok());
    }
}
