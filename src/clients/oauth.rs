use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{OAuthConfig, OAuthProviderConfig};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    GitHub,
}

impl OAuthProvider {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::GitHub => "github",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Self::Google),
            "github" => Some(Self::GitHub),
            _ => None,
        }
    }
}

/// The normalized identity we get back from a provider after the code
/// exchange. `email_verified` is the provider's own assertion.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider: OAuthProvider,
    pub provider_account_id: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

/// Provider-facing surface of the sign-in flow: consent URL construction
/// and the code-for-profile exchange. Handlers go through this trait so
/// tests can substitute a canned provider.
#[async_trait]
pub trait OAuthExchange: Send + Sync {
    fn is_enabled(&self, provider: OAuthProvider) -> bool;

    /// Build the URL the browser is redirected to for consent.
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String>;

    /// Exchange an authorization code and fetch the user's profile.
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthProfile>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    email_verified: Option<bool>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    config: OAuthConfig,
}

impl OAuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("clubboard")
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    fn provider_config(&self, provider: OAuthProvider) -> Result<&OAuthProviderConfig> {
        let cfg = match provider {
            OAuthProvider::Google => &self.config.google,
            OAuthProvider::GitHub => &self.config.github,
        };

        if !cfg.enabled {
            return Err(anyhow::anyhow!(
                "OAuth provider not enabled: {}",
                provider.as_str()
            ));
        }

        Ok(cfg)
    }
}

#[async_trait]
impl OAuthExchange for OAuthClient {
    fn is_enabled(&self, provider: OAuthProvider) -> bool {
        match provider {
            OAuthProvider::Google => self.config.google.enabled,
            OAuthProvider::GitHub => self.config.github.enabled,
        }
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String> {
        let cfg = self.provider_config(provider)?;

        let mut url = match provider {
            OAuthProvider::Google => {
                let mut u = url::Url::parse(GOOGLE_AUTH_URL)?;
                u.query_pairs_mut()
                    .append_pair("response_type", "code")
                    .append_pair("scope", "openid email profile");
                u
            }
            OAuthProvider::GitHub => {
                let mut u = url::Url::parse(GITHUB_AUTH_URL)?;
                u.query_pairs_mut().append_pair("scope", "read:user user:email");
                u
            }
        };

        url.query_pairs_mut()
            .append_pair("client_id", &cfg.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);

        Ok(url.to_string())
    }

    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthProfile> {
        let access_token = self.exchange_code(provider, code, redirect_uri).await?;

        match provider {
            OAuthProvider::Google => self.google_profile(&access_token).await,
            OAuthProvider::GitHub => self.github_profile(&access_token).await,
        }
    }
}

impl OAuthClient {
    async fn exchange_code(
        &self,
        provider: OAuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        let cfg = self.provider_config(provider)?;

        let token_url = match provider {
            OAuthProvider::Google => GOOGLE_TOKEN_URL,
            OAuthProvider::GitHub => GITHUB_TOKEN_URL,
        };

        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .client
            .post(token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "OAuth token exchange failed: {} - {}",
                status,
                body
            ));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn google_profile(&self, access_token: &str) -> Result<OAuthProfile> {
        let response = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Google userinfo error: {} - {}", status, body));
        }

        let info: GoogleUserInfo = response.json().await?;

        Ok(OAuthProfile {
            provider: OAuthProvider::Google,
            provider_account_id: info.sub,
            name: info.name.unwrap_or_else(|| info.email.clone()),
            email: info.email,
            email_verified: info.email_verified.unwrap_or(false),
        })
    }

    async fn github_profile(&self, access_token: &str) -> Result<OAuthProfile> {
        let response = self
            .client
            .get(GITHUB_USER_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GitHub user error: {} - {}", status, body));
        }

        let user: GitHubUser = response.json().await?;

        // The public profile email is often hidden; the emails endpoint has
        // the primary address together with its verification status.
        let (email, verified) = if let Some(email) = user.email.clone() {
            (email, false)
        } else {
            self.github_primary_email(access_token).await?
        };

        Ok(OAuthProfile {
            provider: OAuthProvider::GitHub,
            provider_account_id: user.id.to_string(),
            name: user.name.unwrap_or(user.login),
            email,
            email_verified: verified,
        })
    }

    async fn github_primary_email(&self, access_token: &str) -> Result<(String, bool)> {
        let response = self
            .client
            .get(GITHUB_EMAILS_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GitHub emails error: {} - {}", status, body));
        }

        let emails: Vec<GitHubEmail> = response.json().await?;

        emails
            .into_iter()
            .find(|e| e.primary)
            .map(|e| (e.email, e.verified))
            .ok_or_else(|| anyhow::anyhow!("GitHub account has no primary email"))
    }
}

/// Exchange that hands back a canned profile. Used in tests to drive the
/// callback and link handlers without a live provider.
#[derive(Clone)]
pub struct StaticOAuthExchange {
    profile: Arc<Mutex<OAuthProfile>>,
}

impl StaticOAuthExchange {
    #[must_use]
    pub fn new(profile: OAuthProfile) -> Self {
        Self {
            profile: Arc::new(Mutex::new(profile)),
        }
    }

    /// Swap the profile the next exchange returns.
    pub fn set_profile(&self, profile: OAuthProfile) {
        if let Ok(mut current) = self.profile.lock() {
            *current = profile;
        }
    }
}

#[async_trait]
impl OAuthExchange for StaticOAuthExchange {
    fn is_enabled(&self, _provider: OAuthProvider) -> bool {
        true
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String> {
        Ok(format!(
            "https://provider.invalid/{}/authorize?redirect_uri={redirect_uri}&state={state}",
            provider.as_str()
        ))
    }

    async fn fetch_profile(
        &self,
        _provider: OAuthProvider,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<OAuthProfile> {
        self.profile
            .lock()
            .map(|p| p.clone())
            .map_err(|_| anyhow::anyhow!("Profile lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(OAuthProvider::parse("google"), Some(OAuthProvider::Google));
        assert_eq!(OAuthProvider::parse("github"), Some(OAuthProvider::GitHub));
        assert_eq!(OAuthProvider::parse("gitlab"), None);
    }

    #[test]
    fn test_authorize_url_contains_params() {
        let client = OAuthClient::new(OAuthConfig {
            google: OAuthProviderConfig {
                enabled: true,
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            },
            ..OAuthConfig::default()
        });

        let url = client
            .authorize_url(
                OAuthProvider::Google,
                "http://localhost:8350/api/auth/oauth/google/callback",
                "xyz",
            )
            .unwrap();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn test_disabled_provider_rejected() {
        let client = OAuthClient::new(OAuthConfig::default());
        assert!(
            client
                .authorize_url(OAuthProvider::GitHub, "http://x", "s")
                .is_err()
        );
    }
}
