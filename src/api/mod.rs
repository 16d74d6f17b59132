use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use time;

use crate::config::Config;
use crate::state::SharedState;

pub mod auth;
mod contact;
mod error;
pub mod oauth;
mod observability;
mod posts;
mod settings;
mod system;
mod types;
mod uploads;

pub use error::ApiError;
pub use types::*;

use tokio::sync::RwLock;

use metrics_exporter_prometheus::PrometheusHandle;

// Multipart bodies carry up to a 20 MB PDF plus a 5 MB image.
const MAX_BODY_BYTES: usize = 26 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn crate::services::auth_service::AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn post_service(&self) -> &Arc<dyn crate::services::post_service::PostService> {
        &self.shared.post_service
    }

    #[must_use]
    pub fn uploads(&self) -> &crate::services::uploads::UploadStore {
        &self.shared.uploads
    }

    #[must_use]
    pub fn captcha(&self) -> &Arc<dyn crate::clients::captcha::CaptchaVerifier> {
        &self.shared.captcha
    }

    #[must_use]
    pub fn mailer(&self) -> &Arc<dyn crate::clients::mail::Mailer> {
        &self.shared.mailer
    }

    #[must_use]
    pub fn oauth(&self) -> &Arc<dyn crate::clients::oauth::OAuthExchange> {
        &self.shared.oauth
    }

    #[must_use]
    pub fn limiter(&self) -> &crate::services::rate_limit::RateLimiter {
        &self.shared.limiter
    }
}

pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, secure_cookies, session_minutes) = {
        let config = state.config().read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
            config.server.session_minutes,
        )
    };

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            session_minutes,
        )));

    let api_router = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/verify-email", get(auth::verify_email))
        .route("/auth/admin-check", get(auth::admin_check))
        .route("/auth/oauth/link", post(oauth::link))
        .route("/auth/oauth/{provider}", get(oauth::authorize))
        .route("/auth/oauth/{provider}/callback", get(oauth::callback))
        .route("/posts", get(posts::list_posts))
        .route("/posts", post(posts::create_post))
        .route("/posts/{slug}", get(posts::get_post))
        .route("/posts/{slug}", put(posts::update_post))
        .route("/posts/{slug}", delete(posts::delete_post))
        .route("/settings/personal", get(settings::get_personal))
        .route("/settings/personal", put(settings::update_personal))
        .route("/settings/avatar", post(settings::update_avatar))
        .route("/settings/credentials", put(settings::update_credentials))
        .route(
            "/settings/subscriptions",
            put(settings::update_subscriptions),
        )
        .route("/settings/account", delete(settings::delete_account))
        .route("/contact", post(contact::send_contact))
        .route("/system/status", get(system::get_status))
        .route("/system/metrics", get(observability::get_metrics))
        .layer(session_layer)
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .route(
            "/uploads/{slug}/{filename}",
            get(uploads::serve_upload).with_state(state),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
}
