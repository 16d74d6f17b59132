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
use clubboard::clients::oauth::OAuthClient;
use clubboard::config::Config;
use clubboard::state::SharedState;

const CLIENT_IP: &str = "203.0.113.9";

struct TestApp {
    router: Router,
    mailer: MemoryMailer,
}

async fn spawn_app() -> TestApp {
    spawn_app_with_mailer(MemoryMailer::new()).await
}

async fn spawn_app_with_mailer(mailer: MemoryMailer) -> TestApp {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();

    let base = std::env::temp_dir().join(format!("clubboard-test-{}", uuid::Uuid::new_v4()));
    config.general.upload_path = base.join("uploads").to_string_lossy().to_string();
    config.general.upload_tmp_path = base.join("staging").to_string_lossy().to_string();

    config.security.admin_emails = vec!["admin@club.fr".to_string()];

    let oauth = Arc::new(OAuthClient::new(config.oauth.clone()));
    let shared = SharedState::with_clients(
        config,
        Arc::new(StaticCaptchaVerifier::passing()),
        Arc::new(mailer.clone()),
        oauth,
    )
    .await
    .expect("Failed to create app state");

    let state = api::create_app_state(Arc::new(shared), None);
    TestApp {
        router: api::router(state).await,
        mailer,
    }
}

async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
    cookie: Option<&str>,
) -> (StatusCode, serde_json::Value, Option<String>) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", CLIENT_IP);

    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let response = app
        .clone()
        .oneshot(
            builder
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

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

async fn get(
    app: &Router,
    uri: &str,
    cookie: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().uri(uri).header("x-forwarded-for", CLIENT_IP);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value =
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

fn register_body(name: &str, email: &str, password: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "email": email,
        "password": password,
        "captcha_token": "test-token",
    })
}

fn login_body(email: &str, password: &str) -> serde_json::Value {
    serde_json::json!({
        "email": email,
        "password": password,
        "captcha_token": "test-token",
    })
}

/// Pull the single-use token out of the last captured mail.
fn token_from_mail(mailer: &MemoryMailer) -> String {
    let sent = mailer.sent_messages();
    let html = &sent.last().expect("no mail captured").html;
    let start = html.find("token=").expect("no token in mail") + "token=".len();
    html[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect()
}

/// Registers and verifies an account, returning nothing; the caller logs in.
async fn register_verified(app: &TestApp, name: &str, email: &str, password: &str) {
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body(name, email, password),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = token_from_mail(&app.mailer);
    let (status, _) = get(
        &app.router,
        &format!(
            "/api/auth/verify-email?token={token}&email={}",
            urlencoding::encode(email)
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registration_and_verification_flow() {
    let app = spawn_app().await;

    let (status, body, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body("Marie", "marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // A verification mail went out with a 24-hour link.
    let sent = app.mailer.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "marie@club.fr");
    assert!(sent[0].html.contains("valable 24 heures"));

    // Login before verification is refused without burning the token.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = token_from_mail(&app.mailer);
    let (status, _) = get(
        &app.router,
        &format!("/api/auth/verify-email?token={token}&email=marie%40club.fr"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same token again: single use.
    let (status, _) = get(
        &app.router,
        &format!("/api/auth/verify-email?token={token}&email=marie%40club.fr"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "User");
    let cookie = cookie.expect("login did not set a session cookie");

    let (status, body) = get(&app.router, "/api/auth/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "marie@club.fr");
    assert_eq!(body["data"]["email_verified"], true);
}

#[tokio::test]
async fn test_weak_password_creates_no_account() {
    let app = spawn_app().await;

    // Missing uppercase, digit and special character.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body("Marie", "marie@club.fr", "motdepasse"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.mailer.sent_messages().is_empty());

    // The address is still free.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body("Marie", "marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registration_requires_captcha_token() {
    let app = spawn_app().await;

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/register",
        serde_json::json!({
            "name": "Marie",
            "email": "marie@club.fr",
            "password": "Motdepasse1!",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_blocks_after_five_failures() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    for _ in 0..5 {
        let (status, _, _) = post_json(
            &app.router,
            "/api/auth/login",
            login_body("marie@club.fr", "FauxMotdepasse1!"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Correct credentials inside the block window are still refused.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_unverified_login_never_reaches_block() {
    let app = spawn_app().await;

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body("Marie", "marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Correct credentials on an unverified account do not count as
    // failures, so repeating well past the threshold stays a 403.
    for _ in 0..7 {
        let (status, _, _) = post_json(
            &app.router,
            "/api/auth/login",
            login_body("marie@club.fr", "Motdepasse1!"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    let (status_known, body_known, _) = post_json(
        &app.router,
        "/api/auth/forgot-password",
        serde_json::json!({ "email": "marie@club.fr", "captcha_token": "t" }),
        None,
    )
    .await;

    let (status_unknown, body_unknown, _) = post_json(
        &app.router,
        "/api/auth/forgot-password",
        serde_json::json!({ "email": "inconnu@club.fr", "captcha_token": "t" }),
        None,
    )
    .await;

    assert_eq!(status_known, StatusCode::OK);
    assert_eq!(status_unknown, StatusCode::OK);
    assert_eq!(body_known, body_unknown);
    assert_eq!(
        body_known["data"]["message"],
        "Email envoyé si le compte existe."
    );
}

#[tokio::test]
async fn test_registration_fails_when_mail_undeliverable() {
    let app = spawn_app_with_mailer(MemoryMailer::failing()).await;

    let (status, body, _) = post_json(
        &app.router,
        "/api/auth/register",
        register_body("Marie", "marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Échec de l'envoi de l'email.");
}

#[tokio::test]
async fn test_forgot_password_cooldown_is_account_blind() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    // A second request inside the cooldown answers 429 for a real account.
    for expected in [StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
        let (status, _, _) = post_json(
            &app.router,
            "/api/auth/forgot-password",
            serde_json::json!({ "email": "marie@club.fr", "captcha_token": "t" }),
            None,
        )
        .await;
        assert_eq!(status, expected);
    }

    // And identically for an address with no account behind it.
    for expected in [StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
        let (status, _, _) = post_json(
            &app.router,
            "/api/auth/forgot-password",
            serde_json::json!({ "email": "inconnu@club.fr", "captcha_token": "t" }),
            None,
        )
        .await;
        assert_eq!(status, expected);
    }
}

#[tokio::test]
async fn test_reset_password_flow() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/forgot-password",
        serde_json::json!({ "email": "marie@club.fr", "captcha_token": "t" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = token_from_mail(&app.mailer);

    // A weak replacement password is rejected before the token is
    // consumed, so the same link still works afterwards.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/reset-password",
        serde_json::json!({
            "token": token,
            "email": "marie@club.fr",
            "password": "faible",
            "captcha_token": "t",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/reset-password",
        serde_json::json!({
            "token": token,
            "email": "marie@club.fr",
            "password": "NouveauMdp2!",
            "captcha_token": "t",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Single use.
    let (status, body, _) = post_json(
        &app.router,
        "/api/auth/reset-password",
        serde_json::json!({
            "token": token,
            "email": "marie@club.fr",
            "password": "EncoreUnMdp3!",
            "captcha_token": "t",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Lien invalide ou expiré.");

    // Old password out, new password in.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "NouveauMdp2!"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reset_token_rejected_for_other_email() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;
    register_verified(&app, "Paul", "paul@club.fr", "Motdepasse1!").await;

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/forgot-password",
        serde_json::json!({ "email": "marie@club.fr", "captcha_token": "t" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let token = token_from_mail(&app.mailer);

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/reset-password",
        serde_json::json!({
            "token": token,
            "email": "paul@club.fr",
            "password": "NouveauMdp2!",
            "captcha_token": "t",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The mismatch did not burn the token for its real owner.
    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/reset-password",
        serde_json::json!({
            "token": token,
            "email": "marie@club.fr",
            "password": "NouveauMdp2!",
            "captcha_token": "t",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_check_is_stealthy() {
    let app = spawn_app().await;

    // No session: indistinguishable from a missing route.
    let (status, _) = get(&app.router, "/api/auth/admin-check", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Ordinary member: same 404.
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;
    let (_, _, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    let member_cookie = cookie.unwrap();

    let (status, _) = get(&app.router, "/api/auth/admin-check", Some(&member_cookie)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Administrator.
    register_verified(&app, "Prez", "admin@club.fr", "Motdepasse1!").await;
    let (_, body, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("admin@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    assert_eq!(body["data"]["role"], "Admin");
    let admin_cookie = cookie.unwrap();

    let (status, body) = get(&app.router, "/api/auth/admin-check", Some(&admin_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isAdmin"], true);
}

#[tokio::test]
async fn test_repeated_member_probes_block_silently() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;
    let (_, _, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    let cookie = cookie.unwrap();

    // Before, at and past the probe threshold the answer never changes.
    for _ in 0..8 {
        let (status, _) = get(&app.router, "/api/auth/admin-check", Some(&cookie)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_login_when_already_authenticated_returns_session() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;
    let (_, _, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    let cookie = cookie.unwrap();

    // No captcha token at all: the short-circuit answers from the session
    // before any captcha or rate-limit work.
    let (status, body, _) = post_json(
        &app.router,
        "/api/auth/login",
        serde_json::json!({ "email": "marie@club.fr", "password": "x" }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "marie@club.fr");
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = spawn_app().await;
    register_verified(&app, "Marie", "marie@club.fr", "Motdepasse1!").await;
    let (_, _, cookie) = post_json(
        &app.router,
        "/api/auth/login",
        login_body("marie@club.fr", "Motdepasse1!"),
        None,
    )
    .await;
    let cookie = cookie.unwrap();

    let (status, _, _) = post_json(
        &app.router,
        "/api/auth/logout",
        serde_json::json!({}),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&app.router, "/api/auth/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
