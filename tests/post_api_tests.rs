use std::path::PathBuf;
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

const BOUNDARY: &str = "clubboard-test-boundary";

struct TestApp {
    router: Router,
    mailer: MemoryMailer,
    upload_root: PathBuf,
    staging_root: PathBuf,
}

async fn spawn_app() -> TestApp {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();

    let base = std::env::temp_dir().join(format!("clubboard-test-{}", uuid::Uuid::new_v4()));
    let upload_root = base.join("uploads");
    let staging_root = base.join("staging");
    config.general.upload_path = upload_root.to_string_lossy().to_string();
    config.general.upload_tmp_path = staging_root.to_string_lossy().to_string();

    config.security.admin_emails = vec!["admin@club.fr".to_string()];

    let mailer = MemoryMailer::new();
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
        upload_root,
        staging_root,
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, content_type, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; \
                         filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<(String, Vec<u8>)>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.9");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let request = match body {
        Some((content_type, bytes)) => builder
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value =
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

async fn send_multipart(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    parts: &[Part<'_>],
) -> (StatusCode, serde_json::Value) {
    send(
        app,
        method,
        uri,
        cookie,
        Some((
            format!("multipart/form-data; boundary={BOUNDARY}"),
            multipart_body(parts),
        )),
    )
    .await
}

/// Registers, verifies and logs in an account, returning its session cookie.
async fn login_as(app: &TestApp, name: &str, email: &str) -> String {
    let register = serde_json::json!({
        "name": name,
        "email": email,
        "password": "Motdepasse1!",
        "captcha_token": "t",
    });
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/auth/register",
        None,
        Some((
            "application/json".to_string(),
            serde_json::to_vec(&register).unwrap(),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sent = app.mailer.sent_messages();
    let html = &sent.last().unwrap().html;
    let start = html.find("token=").unwrap() + "token=".len();
    let token: String = html[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();

    let (status, _) = send(
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

    let login = serde_json::json!({
        "email": email,
        "password": "Motdepasse1!",
        "captcha_token": "t",
    });
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::from(serde_json::to_vec(&login).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(ToString::to_string)
        .expect("login did not set a session cookie")
}

fn post_parts<'a>(title: &'a str, image: &'a [u8]) -> Vec<Part<'a>> {
    vec![
        Part::Text("title", title),
        Part::Text("content", "Rendez-vous au gymnase."),
        Part::Text("category", "Tennis"),
        Part::File("image", "affiche.png", "image/png", image),
    ]
}

#[tokio::test]
async fn test_post_creation_requires_admin() {
    let app = spawn_app().await;
    let image = b"fake-png-bytes";

    // Anonymous.
    let (status, _) = send_multipart(
        &app.router,
        "POST",
        "/api/posts",
        None,
        &post_parts("Tournoi", image),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Ordinary member.
    let member = login_as(&app, "Marie", "marie@club.fr").await;
    let (status, _) = send_multipart(
        &app.router,
        "POST",
        "/api/posts",
        Some(&member),
        &post_parts("Tournoi", image),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_post_crud_and_slug_dedup() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;
    let image = b"fake-png-bytes";

    let (status, body) = send_multipart(
        &app.router,
        "POST",
        "/api/posts",
        Some(&admin),
        &post_parts("Tournoi d'été", image),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["slug"], "tournoi-d-ete");
    assert_eq!(body["data"]["category"], "Tennis");

    // Same title again: numeric suffix, no overwrite.
    let (status, body) = send_multipart(
        &app.router,
        "POST",
        "/api/posts",
        Some(&admin),
        &post_parts("Tournoi d'été", image),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["slug"], "tournoi-d-ete-1");

    // Public read, no session needed.
    let (status, body) = send(&app.router, "GET", "/api/posts/tournoi-d-ete", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Tournoi d'été");

    let image_path = body["data"]["image_path"].as_str().unwrap().to_string();
    assert!(image_path.starts_with("tournoi-d-ete/"));

    // The published image is served back.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/uploads/{image_path}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], &image[..]);

    let (status, body) = send(&app.router, "GET", "/api/posts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app.router,
        "DELETE",
        "/api/posts/tournoi-d-ete",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, "GET", "/api/posts/tournoi-d-ete", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The post's directory went with it.
    assert!(!app.upload_root.join("tournoi-d-ete").exists());
    assert!(app.upload_root.join("tournoi-d-ete-1").exists());
}

#[tokio::test]
async fn test_post_requires_image() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;

    let parts = vec![
        Part::Text("title", "Sans image"),
        Part::Text("content", "Contenu."),
        Part::Text("category", "Gym"),
    ];
    let (status, body) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &parts).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Une image est requise.");
}

#[tokio::test]
async fn test_unknown_category_rejected() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;

    let parts = vec![
        Part::Text("title", "Echecs"),
        Part::Text("content", "Contenu."),
        Part::Text("category", "Echecs"),
        Part::File("image", "a.png", "image/png", b"png"),
    ];
    let (status, _) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &parts).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_image_leaves_nothing_behind() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;

    let oversized = vec![0u8; 5 * 1024 * 1024 + 1];
    let parts = vec![
        Part::Text("title", "Trop gros"),
        Part::Text("content", "Contenu."),
        Part::Text("category", "Basket"),
        Part::File("image", "gros.png", "image/png", &oversized),
    ];
    let (status, _) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &parts).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing persisted: no post row, no staged file, no published dir.
    let (status, body) = send(&app.router, "GET", "/api/posts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let staged: Vec<_> = std::fs::read_dir(&app.staging_root)
        .map(|d| d.filter_map(Result::ok).collect())
        .unwrap_or_default();
    assert!(staged.is_empty());
    assert!(!app.upload_root.join("trop-gros").exists());
}

#[tokio::test]
async fn test_unsupported_file_type_rejected() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;

    let parts = vec![
        Part::Text("title", "Script"),
        Part::Text("content", "Contenu."),
        Part::Text("category", "Boule"),
        Part::File("image", "evil.svg", "image/svg+xml", b"<svg/>"),
    ];
    let (status, _) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &parts).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_category_filter() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;
    let image = b"fake-png-bytes";

    let tennis = post_parts("Tournoi de tennis", image);
    let (status, _) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &tennis).await;
    assert_eq!(status, StatusCode::CREATED);

    let basket = vec![
        Part::Text("title", "Match de basket"),
        Part::Text("content", "Contenu."),
        Part::Text("category", "Basket"),
        Part::File("image", "b.png", "image/png", image.as_slice()),
    ];
    let (status, _) =
        send_multipart(&app.router, "POST", "/api/posts", Some(&admin), &basket).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app.router, "GET", "/api/posts?category=Basket", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let posts = body["data"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["category"], "Basket");

    let (status, _) = send(&app.router, "GET", "/api/posts?category=Foot", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_retitles_and_relocates_files() {
    let app = spawn_app().await;
    let admin = login_as(&app, "Prez", "admin@club.fr").await;
    let image = b"fake-png-bytes";

    let (status, body) = send_multipart(
        &app.router,
        "POST",
        "/api/posts",
        Some(&admin),
        &post_parts("Ancien titre", image),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["slug"], "ancien-titre");

    let update = vec![
        Part::Text("title", "Nouveau titre"),
        Part::Text("content", "Contenu mis à jour."),
        Part::Text("category", "Tennis"),
    ];
    let (status, body) = send_multipart(
        &app.router,
        "PUT",
        "/api/posts/ancien-titre",
        Some(&admin),
        &update,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], "nouveau-titre");

    let image_path = body["data"]["image_path"].as_str().unwrap();
    assert!(image_path.starts_with("nouveau-titre/"));
    assert!(app.upload_root.join(image_path).exists());
    assert!(!app.upload_root.join("ancien-titre").exists());

    let (status, _) = send(&app.router, "GET", "/api/posts/ancien-titre", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_traversal_is_a_plain_404() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/uploads/..%2F..%2Fetc/passwd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
