//! Cycle notifications.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use thermocal_core::config::{NotifierKind, ThermocalConfig};

const MAILGUN_API: &str = "https://api.mailgun.net/v3";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification transport failed: {0}")]
    Transport(String),
    #[error("Notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(subject, "Notification (not sent):\n{}", body);
        Ok(())
    }
}

/// Sends notifications as plain-text mail through the Mailgun HTTP API.
pub struct MailgunNotifier {
    http: reqwest::Client,
    domain: String,
    api_key: String,
    to_address: String,
    from_address: String,
}

impl MailgunNotifier {
    pub fn new(domain: &str, api_key: &str, to_address: &str, from_address: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
            to_address: to_address.to_string(),
            from_address: from_address.to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}/{}/messages", MAILGUN_API, self.domain)
    }

    fn form<'a>(&'a self, subject: &'a str, body: &'a str) -> [(&'static str, &'a str); 4] {
        [
            ("from", self.from_address.as_str()),
            ("to", self.to_address.as_str()),
            ("subject", subject),
            ("text", body),
        ]
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.url())
            .basic_auth("api", Some(&self.api_key))
            .form(&self.form(subject, body))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(subject, to = %self.to_address, "Notification sent");
        Ok(())
    }
}

/// Pick the notifier for this config. Debug mode always logs.
pub fn build_notifier(config: &ThermocalConfig) -> Arc<dyn Notifier> {
    if config.general.debug {
        return Arc::new(LogNotifier);
    }
    match config.notifier.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Mailgun => Arc::new(MailgunNotifier::new(
            &config.notifier.mailgun_domain,
            &config.notifier.mailgun_api_key,
            &config.notifier.to_address,
            &config.notifier.from_address,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailgun_request_shape() {
        let notifier = MailgunNotifier::new("mg.example.com", "key", "me@example.com", "bot@example.com");
        assert_eq!(notifier.url(), "https://api.mailgun.net/v3/mg.example.com/messages");
        assert_eq!(
            notifier.form("2 events processed", "body"),
            [
                ("from", "bot@example.com"),
                ("to", "me@example.com"),
                ("subject", "2 events processed"),
                ("text", "body"),
            ]
        );
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.notify("subject", "body").await.is_ok());
    }
}
