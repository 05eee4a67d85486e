#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use media_catalog::{
    AppConfig, AppState, MockStorageService, create_router, auth::MockAuthBackend,
    memory::MemoryRepository,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "secret1";
pub const CATEGORIES: [&str; 4] = ["ação", "assistir", "comédia", "drama"];

const BOUNDARY: &str = "catalog-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub auth: Arc<MockAuthBackend>,
    pub repo: Arc<MemoryRepository>,
    pub storage: Arc<MockStorageService>,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// An app whose session has not been resolved yet.
pub fn unstarted_app(auth: MockAuthBackend, storage: MockStorageService) -> TestApp {
    unstarted_app_with_config(auth, storage, AppConfig::default())
}

pub fn unstarted_app_with_config(
    auth: MockAuthBackend,
    storage: MockStorageService,
    config: AppConfig,
) -> TestApp {
    let auth = Arc::new(auth);
    let repo = Arc::new(MemoryRepository::seeded(&CATEGORIES));
    let storage = Arc::new(storage);

    let state = AppState::new(
        repo.clone(),
        storage.clone(),
        auth.clone(),
        config,
    );
    TestApp {
        router: create_router(state.clone()),
        state,
        auth,
        repo,
        storage,
    }
}

pub async fn app_with(auth: MockAuthBackend, storage: MockStorageService) -> TestApp {
    let app = unstarted_app(auth, storage);
    app.state.session.start().await;
    app
}

/// Nobody signed in; `alice@example.com` and `root@admin.com` can sign in with `PASSWORD`.
pub async fn signed_out_app() -> TestApp {
    let auth = MockAuthBackend::new()
        .with_user("alice@example.com", PASSWORD)
        .with_user("root@admin.com", PASSWORD);
    app_with(auth, MockStorageService::new()).await
}

/// `alice@example.com` signed in, with `config` in place of the defaults.
pub async fn signed_in_app_with_config(config: AppConfig) -> TestApp {
    let auth = MockAuthBackend::new().with_active_session("alice@example.com", PASSWORD);
    let app = unstarted_app_with_config(auth, MockStorageService::new(), config);
    app.state.session.start().await;
    app
}

pub async fn signed_in_app(email: &str) -> TestApp {
    let auth = MockAuthBackend::new().with_active_session(email, PASSWORD);
    app_with(auth, MockStorageService::new()).await
}

// --- Requests ---

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn empty(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A file part of a title form.
pub struct FilePart<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

pub const PNG: FilePart<'static> = FilePart {
    file_name: "poster.png",
    content_type: "image/png",
    bytes: &[0x89, b'P', b'N', b'G', 0x0d, 0x0a],
};

/// A `multipart/form-data` title form. `title: None` leaves the JSON part out.
pub fn title_form(
    method: Method,
    uri: &str,
    title: Option<Value>,
    image: Option<FilePart<'_>>,
) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();

    if let Some(title) = title {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(file) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// --- Responses ---

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}
