//! Shared helpers for the integration tests
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tower::ServiceExt;

use shortlinks::config::Config;
use shortlinks::database::init_db;
use shortlinks::route::create_app;
use shortlinks::state::AppState;

pub const OG_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Fixture &amp; Page</title>
  <meta name="viewport" content="width=device-width">
  <meta property="og:title" content="Fixture Page">
  <meta property="og:image" content="https://example.com/cover.png">
  <meta name="description" content="A page served to the tests">
  <meta name="twitter:card" content="summary">
</head>
<body><p>Hello</p></body>
</html>"#;

/// Test application with its state and the temp file backing its database
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _temp_db: NamedTempFile,
}

pub fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {})
}

/// Like [`setup_test_app`], with `configure` applied to the test config
pub fn setup_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_db.path().to_str().unwrap();

    let mut config = Config::for_tests(db_path);
    configure(&mut config);
    let db = init_db(db_path).expect("Failed to initialize test database");
    let state = AppState::new(config, db).expect("Failed to build state");

    TestApp {
        app: create_app(state.clone()),
        state,
        _temp_db: temp_db,
    }
}

/// Serves fixture pages on an ephemeral local port; returns its origin
///
/// - `/og` - HTML with a title and Open Graph / Twitter / description metas
/// - `/plain` - a plain text body
/// - `/broken` - malformed markup
/// - `/missing` - 404
pub async fn spawn_fixture_site() -> String {
    let site = Router::new()
        .route("/og", get(|| async { Html(OG_PAGE) }))
        .route("/plain", get(|| async { "just some text" }))
        .route(
            "/broken",
            get(|| async { Html("<html><head><title>Unclosed <meta property=") }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nothing here").into_response() }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, site).await.unwrap();
    });

    format!("http://{addr}")
}

/// Size of each chunk written by [`spawn_chunked_site`]
pub const RAW_CHUNK: usize = 64 * 1024;

/// Accepts one connection and reads (part of) its request
async fn accept_one(listener: TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut request = [0u8; 4096];
    let _ = stream.read(&mut request).await;
    stream
}

/// Answers one request with `status_line` and an empty body
///
/// Lets tests send reason phrases that differ from the canonical ones.
pub async fn spawn_status_site(status_line: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut stream = accept_one(listener).await;
        let response =
            format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let _ = stream.write_all(response.as_bytes()).await;
    });

    format!("http://{addr}/")
}

/// Answers one request with an HTML body of `chunks` chunks and no
/// `Content-Length`
///
/// The handle resolves to the number of body bytes written before the
/// client hung up or the body ended.
pub async fn spawn_chunked_site(chunks: usize) -> (String, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut stream = accept_one(listener).await;
        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: text/html\r\n\
                    Transfer-Encoding: chunked\r\n\r\n";
        if stream.write_all(head.as_bytes()).await.is_err() {
            return 0;
        }

        let chunk = vec![b'x'; RAW_CHUNK];
        let mut written = 0;
        for _ in 0..chunks {
            let mut frame = format!("{RAW_CHUNK:x}\r\n").into_bytes();
            frame.extend_from_slice(&chunk);
            frame.extend_from_slice(b"\r\n");
            if stream.write_all(&frame).await.is_err() {
                return written;
            }
            written += RAW_CHUNK;
        }
        let _ = stream.write_all(b"0\r\n\r\n").await;
        written
    });

    (format!("http://{addr}/"), handle)
}

/// URL on a local port nothing listens on
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

/// Helper function to parse response body as JSON
pub async fn response_json(body: Body) -> Value {
    let bytes = body
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();

    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

pub async fn response_text(body: Body) -> String {
    let bytes = body
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();

    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Sends a request, with an optional bearer token and JSON body
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    app.clone().oneshot(request).await.unwrap()
}

/// Signs up `username` and signs in; returns the token
pub async fn sign_up_and_in(app: &Router, username: &str, password: &str) -> String {
    let response = send(
        app,
        "POST",
        "/api/users",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(
        app,
        "POST",
        "/api/sign-in",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response.into_body()).await;
    body["token"].as_str().unwrap().to_string()
}
