use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::CaptchaConfig;

/// Result of a captcha check. `Unavailable` means the verification service
/// could not be reached or gave an unusable answer; callers must treat it as
/// a server-side failure, never as a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptchaOutcome {
    Verified { score: f64 },
    Failed,
    Unavailable,
}

impl CaptchaOutcome {
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> CaptchaOutcome;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    score: Option<f64>,
    #[serde(rename = "error-codes")]
    error_codes: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct HttpCaptchaVerifier {
    client: Client,
    config: CaptchaConfig,
}

impl HttpCaptchaVerifier {
    #[must_use]
    pub fn new(config: CaptchaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    async fn site_verify(&self, token: &str, remote_ip: Option<&str>) -> anyhow::Result<SiteVerifyResponse> {
        let mut params = vec![
            ("secret", self.config.secret_key.as_str()),
            ("response", token),
        ];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.config.verify_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Captcha API error: {} - {}", status, body));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CaptchaVerifier for HttpCaptchaVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> CaptchaOutcome {
        if !self.config.enabled {
            return CaptchaOutcome::Verified { score: 1.0 };
        }

        match self.site_verify(token, remote_ip).await {
            Ok(body) => {
                if !body.success {
                    let codes = body.error_codes.unwrap_or_default();
                    // These codes mean the service itself misbehaved rather
                    // than the visitor failing the challenge.
                    let service_side = codes
                        .iter()
                        .any(|c| c == "invalid-input-secret" || c == "missing-input-secret");
                    if service_side {
                        warn!("Captcha service rejected our credentials: {:?}", codes);
                        return CaptchaOutcome::Unavailable;
                    }
                    return CaptchaOutcome::Failed;
                }

                let score = body.score.unwrap_or(0.0);
                if score < self.config.min_score {
                    CaptchaOutcome::Failed
                } else {
                    CaptchaOutcome::Verified { score }
                }
            }
            Err(e) => {
                warn!("Captcha verification unavailable: {}", e);
                CaptchaOutcome::Unavailable
            }
        }
    }
}

/// Verifier that always returns a fixed outcome. Used in tests to drive the
/// handlers through every captcha branch without network access.
#[derive(Clone)]
pub struct StaticCaptchaVerifier {
    outcome: CaptchaOutcome,
}

impl StaticCaptchaVerifier {
    #[must_use]
    pub const fn new(outcome: CaptchaOutcome) -> Self {
        Self { outcome }
    }

    #[must_use]
    pub const fn passing() -> Self {
        Self::new(CaptchaOutcome::Verified { score: 0.9 })
    }
}

#[async_trait]
impl CaptchaVerifier for StaticCaptchaVerifier {
    async fn verify(&self, _token: &str, _remote_ip: Option<&str>) -> CaptchaOutcome {
        self.outcome
    }
}
