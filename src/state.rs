use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::clients::captcha::{CaptchaVerifier, HttpCaptchaVerifier};
use crate::clients::mail::{HttpMailClient, Mailer, MemoryMailer};
use crate::clients::oauth::{OAuthClient, OAuthExchange};
use crate::config::Config;
use crate::db::Store;
use crate::services::auth_service::AuthService;
use crate::services::auth_service_impl::SeaOrmAuthService;
use crate::services::newsletter::NewsletterService;
use crate::services::post_service::PostService;
use crate::services::post_service_impl::SeaOrmPostService;
use crate::services::rate_limit::{Kv, MemoryKv, RateLimiter};
use crate::services::uploads::UploadStore;

/// Everything the API handlers and the scheduler share. Built once at
/// startup and handed around behind an `Arc`.
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,
    pub store: Store,
    pub limiter: RateLimiter,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub mailer: Arc<dyn Mailer>,
    pub oauth: Arc<dyn OAuthExchange>,
    pub uploads: UploadStore,
    pub auth_service: Arc<dyn AuthService>,
    pub post_service: Arc<dyn PostService>,
    pub newsletter: NewsletterService,
}

impl SharedState {
    pub async fn new(config: Config) -> Result<Self> {
        let captcha: Arc<dyn CaptchaVerifier> =
            Arc::new(HttpCaptchaVerifier::new(config.captcha.clone()));

        let mailer: Arc<dyn Mailer> = if config.mail.enabled {
            Arc::new(HttpMailClient::new(config.mail.clone()))
        } else {
            Arc::new(MemoryMailer::new())
        };

        let oauth: Arc<dyn OAuthExchange> = Arc::new(OAuthClient::new(config.oauth.clone()));

        Self::with_clients(config, captcha, mailer, oauth).await
    }

    /// Same wiring with the outbound clients injected. Tests use this to
    /// swap in `StaticCaptchaVerifier`, `MemoryMailer` and
    /// `StaticOAuthExchange`.
    pub async fn with_clients(
        config: Config,
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<dyn Mailer>,
        oauth: Arc<dyn OAuthExchange>,
    ) -> Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let limiter = RateLimiter::new(kv, config.security.clone());

        let uploads = UploadStore::new(
            &config.general.upload_path,
            &config.general.upload_tmp_path,
        )?;

        let auth_service: Arc<dyn AuthService> = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            limiter.clone(),
            Arc::clone(&captcha),
            Arc::clone(&mailer),
            config.clone(),
        ));

        let post_service: Arc<dyn PostService> =
            Arc::new(SeaOrmPostService::new(store.clone(), uploads.clone()));

        let newsletter = NewsletterService::new(
            store.clone(),
            Arc::clone(&mailer),
            config.server.base_url.clone(),
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            limiter,
            captcha,
            mailer,
            oauth,
            uploads,
            auth_service,
            post_service,
            newsletter,
        })
    }
}
