use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message. An error here is surfaced to the caller as a
    /// server failure; flows never pretend a mail went out when it did not.
    async fn send(&self, message: MailMessage) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Transactional mail delivery over an HTTP JSON API.
#[derive(Clone)]
pub struct HttpMailClient {
    client: Client,
    config: MailConfig,
}

impl HttpMailClient {
    #[must_use]
    pub fn new(config: MailConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();

        Self { client, config }
    }
}

#[async_trait]
impl Mailer for HttpMailClient {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        let body = SendRequest {
            from: format!("{} <{}>", self.config.from_name, self.config.from_address),
            to: [message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Mail API error: {} - {}", status, text));
        }

        info!("Mail sent: {}", message.subject);
        Ok(())
    }
}

/// Mailer that records messages instead of delivering them. Used in tests
/// and when mail is disabled in config.
#[derive(Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    fail: bool,
}

impl MemoryMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails, for exercising delivery-error paths.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    #[must_use]
    pub fn sent_messages(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow::anyhow!("Mail delivery disabled"));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}
