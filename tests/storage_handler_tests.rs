mod common;

use axum::http::{Method, StatusCode};
use common::{FilePart, PASSWORD, PNG, TestApp, app_with, body_json, signed_in_app, title_form};
use media_catalog::{MockStorageService, auth::MockAuthBackend};
use serde_json::json;

fn heat() -> serde_json::Value {
    json!({ "name": "Heat", "type": "movie", "category": "drama", "rating": 8.5 })
}

async fn failing_storage_app() -> TestApp {
    let auth = MockAuthBackend::new().with_active_session("alice@example.com", PASSWORD);
    app_with(auth, MockStorageService::new_failing()).await
}

#[tokio::test]
async fn test_create_with_poster_uploads_and_stores_url() {
    let app = signed_in_app("alice@example.com").await;
    let user_id = app.state.session.current_user().unwrap().id;

    let response = app
        .send(title_form(Method::POST, "/api/titles", Some(heat()), Some(PNG)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let title = body_json(response).await;

    let uploads = app.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].content_type, "image/png");
    assert_eq!(uploads[0].size, PNG.bytes.len());
    assert!(uploads[0].key.starts_with(&format!("titles/{}/", user_id)));
    assert!(uploads[0].key.ends_with(".png"));
    assert_eq!(
        title["image"],
        format!("http://localhost:9000/mock-bucket/{}", uploads[0].key)
    );
}

#[tokio::test]
async fn test_update_replaces_poster() {
    let app = signed_in_app("alice@example.com").await;
    let created = body_json(
        app.send(title_form(Method::POST, "/api/titles", Some(heat()), None))
            .await,
    )
    .await;
    assert!(created["image"].is_null());

    let id = created["id"].as_str().unwrap();
    let response = app
        .send(title_form(
            Method::PUT,
            &format!("/api/titles/{}", id),
            Some(json!({})),
            Some(FilePart {
                file_name: "new.JPG",
                content_type: "image/jpeg",
                bytes: b"jpeg-bytes",
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert!(updated["image"].as_str().unwrap().ends_with(".jpg"));
    assert_eq!(updated["name"], "Heat");
}

#[tokio::test]
async fn test_empty_file_part_counts_as_no_image() {
    let app = signed_in_app("alice@example.com").await;
    let response = app
        .send(title_form(
            Method::POST,
            "/api/titles",
            Some(heat()),
            Some(FilePart {
                file_name: "",
                content_type: "application/octet-stream",
                bytes: b"",
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(body_json(response).await["image"].is_null());
    assert!(app.storage.uploads().is_empty());
}

#[tokio::test]
async fn test_non_image_upload_is_rejected() {
    let app = signed_in_app("alice@example.com").await;
    let response = app
        .send(title_form(
            Method::POST,
            "/api/titles",
            Some(heat()),
            Some(FilePart {
                file_name: "notes.pdf",
                content_type: "application/pdf",
                bytes: b"%PDF-1.7",
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.storage.uploads().is_empty());
    assert!(app.repo.all_titles().await.is_empty());
}

#[tokio::test]
async fn test_missing_title_part_is_rejected() {
    let app = signed_in_app("alice@example.com").await;
    let response = app
        .send(title_form(Method::POST, "/api/titles", None, Some(PNG)))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_storage_failure_is_bad_gateway_and_saves_nothing() {
    let app = failing_storage_app().await;
    let response = app
        .send(title_form(Method::POST, "/api/titles", Some(heat()), Some(PNG)))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "STORAGE_ERROR");
    assert!(app.repo.all_titles().await.is_empty());
}

#[tokio::test]
async fn test_failing_storage_does_not_block_titles_without_poster() {
    let app = failing_storage_app().await;
    let response = app
        .send(title_form(Method::POST, "/api/titles", Some(heat()), None))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}
