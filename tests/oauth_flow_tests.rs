use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use clubboard::api;
use clubboard::clients::captcha::StaticCaptchaVerifier;
use clubboard::clients::mail::MemoryMailer;
use clubboard::clients::oauth::{OAuthProfile, OAuthProvider, StaticOAuthExchange};
use clubboard::config::Config;
use clubboard::state::SharedState;

const CLIENT_IP: &str = "203.0.113.40";

struct TestApp {
    router: Router,
    mailer: MemoryMailer,
    oauth: StaticOAuthExchange,
}

fn google_profile(email: &str, verified: bool) -> OAuthProfile {
    OAuthProfile {
        provider: OAuthProvider::Google,
        provider_account_id: "google-1001".to_string(),
        email: email.to_string(),
        name: "Marie".to_string(),
        email_verified: verified,
    }
}

async fn spawn_app(profile: OAuthProfile) -> TestApp {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();

    let base = std::env::temp_dir().join(format!("clubboard-test-{}", uuid::Uuid::new_v4()));
    config.general.upload_path = base.join("uploads").to_string_lossy().to_string();
    config.general.upload_tmp_path = base.join("staging").to_string_lossy().to_string();

    let mailer = MemoryMailer::new();
    let oauth = StaticOAuthExchange::new(profile);
    let shared = SharedState::with_clients(
        config,
        Arc::new(StaticCaptchaVerifier::passing()),
        Arc::new(mailer.clone()),
        Arc::new(oauth.clone()),
    )
    .await
    .expect("Failed to create app state");

    let state = api::create_app_state(Arc::new(shared), None);
    TestApp {
        router: api::router(state).await,
        mailer,
        oauth,
    }
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value, Option<String>) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP);

    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let session_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(ToString::to_string);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value =
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    (status, json, session_cookie)
}

/// Runs the authorize + callback dance on one session, returning the
/// callback status, body and the session cookie carried through.
async fn oauth_callback(
    app: &TestApp,
    provider: &str,
) -> (StatusCode, serde_json::Value, String) {
    let (status, body, cookie) = request(
        &app.router,
        "GET",
        &format!("/api/auth/oauth/{provider}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let cookie = cookie.expect("authorize did not set a session cookie");

    let url = body["data"]["url"].as_str().expect("no consent url");
    let state = url.split("state=").nth(1).expect("no state in consent url");

    let (status, body, _) = request(
        &app.router,
        "GET",
        &format!("/api/auth/oauth/{provider}/callback?code=test-code&state={state}"),
        Some(&cookie),
        None,
    )
    .await;

    (status, body, cookie)
}

fn token_from_mail(mailer: &MemoryMailer) -> String {
    let sent = mailer.sent_messages();
    let html = &sent.last().expect("no mail captured").html;
    let start = html.find("token=").expect("no token in mail") + "token=".len();
    html[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect()
}

/// Registers and verifies a credential account.
async fn register_verified(app: &TestApp, name: &str, email: &str, password: &str) {
    let (status, _, _) = request(
        &app.router,
        "POST",
        "/api/auth/register",
        None,
        Some(serde_json::json!({
            "name": name,
            "email": email,
            "password": password,
            "captcha_token": "test-token",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = token_from_mail(&app.mailer);
    let (status, _, _) = request(
        &app.router,
        "GET",
        &format!(
            "/api/auth/verify-email?token={token}&email={}",
            urlencoding::encode(email)
        ),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_callback_creates_account_from_verified_email() {
    let app = spawn_app(google_profile("marie@club.fr", true)).await;

    let (status, body, cookie) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "User");

    let (status, body, _) =
        request(&app.router, "GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "marie@club.fr");
    assert_eq!(body["data"]["email_verified"], true);
}

#[tokio::test]
async fn test_unverified_provider_email_cannot_create_account() {
    let app = spawn_app(google_profile("marie@club.fr", false)).await;

    let (status, _, cookie) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Nothing was created and no session was established.
    let (status, _, _) = request(&app.router, "GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unverified_provider_email_cannot_claim_passwordless_account() {
    let app = spawn_app(google_profile("marie@club.fr", true)).await;

    // A provider-created account exists for this address.
    let (status, _, _) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::OK);

    // A second provider asserts the same address without having verified it.
    app.oauth.set_profile(OAuthProfile {
        provider: OAuthProvider::GitHub,
        provider_account_id: "github-77".to_string(),
        email: "marie@club.fr".to_string(),
        name: "marie".to_string(),
        email_verified: false,
    });

    let (status, _, cookie) = oauth_callback(&app, "github").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = request(&app.router, "GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_account_requires_explicit_link() {
    let app = spawn_app(google_profile("marie@club.fr", true)).await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    let (status, body, cookie) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "link_required");

    // The wrong password does not link.
    let (status, _, _) = request(
        &app.router,
        "POST",
        "/api/auth/oauth/link",
        Some(&cookie),
        Some(serde_json::json!({ "password": "FauxMotdepasse1!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The account password completes the link and signs in.
    let (status, body, _) = request(
        &app.router,
        "POST",
        "/api/auth/oauth/link",
        Some(&cookie),
        Some(serde_json::json!({ "password": "Motdepasse1!" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "marie@club.fr");

    // The provider identity is now linked; the next callback signs
    // straight in with no confirmation step.
    let (status, _, _) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_link_attempts_share_login_throttling() {
    let app = spawn_app(google_profile("marie@club.fr", true)).await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    let (status, _, cookie) = oauth_callback(&app, "google").await;
    assert_eq!(status, StatusCode::CONFLICT);

    for _ in 0..5 {
        let (status, _, _) = request(
            &app.router,
            "POST",
            "/api/auth/oauth/link",
            Some(&cookie),
            Some(serde_json::json!({ "password": "FauxMotdepasse1!" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Inside the block window even the right password is refused.
    let (status, _, _) = request(
        &app.router,
        "POST",
        "/api/auth/oauth/link",
        Some(&cookie),
        Some(serde_json::json!({ "password": "Motdepasse1!" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // The block covers the login endpoint for the same identity too.
    let (status, _, _) = request(
        &app.router,
        "POST",
        "/api/auth/login",
        None,
        Some(serde_json::json!({
            "email": "marie@club.fr",
            "password": "Motdepasse1!",
            "captcha_token": "test-token",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}
