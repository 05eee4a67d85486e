mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use common::{
    PASSWORD, body_json, empty, get, json, signed_in_app, signed_in_app_with_config,
    signed_out_app, title_form, unstarted_app,
};
use media_catalog::{
    AppConfig, MockStorageService,
    auth::MockAuthBackend,
    models::{Taxonomy, Title},
    repository::Repository,
};
use serde_json::json;
use uuid::Uuid;

fn heat() -> serde_json::Value {
    json!({ "name": "Heat", "type": "movie", "category": "drama", "rating": 8.5 })
}

async fn create(app: &common::TestApp, title: serde_json::Value) -> Title {
    let response = app
        .send(title_form(Method::POST, "/api/titles", Some(title), None))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    serde_json::from_value(body_json(response).await).unwrap()
}

// --- Public Endpoints ---

#[tokio::test]
async fn test_health_check() {
    let app = signed_out_app().await;
    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_reports_loading_before_start() {
    let app = unstarted_app(MockAuthBackend::new(), MockStorageService::new());

    let session = body_json(app.send(get("/api/session")).await).await;
    assert_eq!(session["loading"], true);
    assert!(session["user"].is_null());

    let response = app.send(get("/api/titles")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "SESSION_PENDING");
}

#[tokio::test]
async fn test_api_requires_signed_in_user() {
    let app = signed_out_app().await;
    for request in [
        get("/api/titles"),
        get("/api/trash"),
        get("/api/categories"),
        empty(Method::POST, "/api/titles/reconcile"),
    ] {
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "AUTH_REQUIRED");
    }
}

// --- Account Flow ---

#[tokio::test]
async fn test_sign_in_then_use_api() {
    let app = signed_out_app().await;

    let response = app
        .send(json(
            Method::POST,
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;
    assert_eq!(session["user"]["email"], "alice@example.com");
    assert_eq!(session["is_admin"], false);
    assert_eq!(session["loading"], false);

    let response = app.send(get("/api/titles")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_sign_in_failures() {
    let app = signed_out_app().await;

    let wrong = app
        .send(json(
            Method::POST,
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": "nope-nope" }),
        ))
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await["code"], "INVALID_CREDENTIALS");

    let malformed = app
        .send(json(
            Method::POST,
            "/api/auth/sign-in",
            json!({ "email": "not-an-email", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let session = body_json(app.send(get("/api/session")).await).await;
    assert!(session["user"].is_null());
}

#[tokio::test]
async fn test_sign_up() {
    let app = signed_out_app().await;

    let response = app
        .send(json(
            Method::POST,
            "/api/auth/sign-up",
            json!({ "email": "new@example.com", "password": "longenough" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["email"], "new@example.com");

    let short = app
        .send(json(
            Method::POST,
            "/api/auth/sign-up",
            json!({ "email": "other@example.com", "password": "12345" }),
        ))
        .await;
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(short).await["code"], "VALIDATION_ERROR");

    let duplicate = app
        .send(json(
            Method::POST,
            "/api/auth/sign-up",
            json!({ "email": "alice@example.com", "password": "longenough" }),
        ))
        .await;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(duplicate).await["code"], "AUTH_REJECTED");
}

#[tokio::test]
async fn test_sign_out_always_succeeds() {
    let app = signed_in_app("alice@example.com").await;
    app.auth.expire_session();

    let response = app.send(empty(Method::POST, "/api/auth/sign-out")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.send(get("/api/titles")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = signed_out_app().await;

    let response = app
        .send(json(
            Method::POST,
            "/api/auth/password-reset",
            json!({ "email": "alice@example.com" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let bad_code = app
        .send(json(
            Method::POST,
            "/api/auth/verify-reset-code",
            json!({ "email": "alice@example.com", "code": "999999" }),
        ))
        .await;
    assert_eq!(bad_code.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json(
            Method::POST,
            "/api/auth/verify-reset-code",
            json!({ "email": "alice@example.com", "code": MockAuthBackend::RESET_CODE }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["email"], "alice@example.com");

    let short = app
        .send(json(Method::PUT, "/api/auth/password", json!({ "password": "123" })))
        .await;
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json(
            Method::PUT,
            "/api/auth/password",
            json!({ "password": "brand-new-secret" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// --- Titles ---

#[tokio::test]
async fn test_title_lifecycle() {
    let app = signed_in_app("alice@example.com").await;
    let title = create(&app, heat()).await;
    assert_eq!(title.name, "Heat");
    assert!(title.image.is_none());

    let response = app.send(get(&format!("/api/titles/{}", title.id))).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Update: only the rating changes.
    let response = app
        .send(title_form(
            Method::PUT,
            &format!("/api/titles/{}", title.id),
            Some(json!({ "rating": 9.0 })),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Title = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(updated.rating, 9.0);
    assert_eq!(updated.category, "drama");

    // Trash hides it from the list and shows it in the trash.
    let response = app
        .send(empty(Method::POST, &format!("/api/titles/{}/trash", title.id)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(app.send(get("/api/titles")).await).await, json!([]));
    let trash = body_json(app.send(get("/api/trash")).await).await;
    assert_eq!(trash[0]["id"], title.id.to_string());

    let response = app
        .send(empty(Method::POST, &format!("/api/titles/{}/restore", title.id)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(app.send(get("/api/titles")).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = app
        .send(empty(Method::DELETE, &format!("/api/titles/{}", title.id)))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.send(get(&format!("/api/titles/{}", title.id))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_validation() {
    let app = signed_in_app("alice@example.com").await;

    let response = app
        .send(title_form(
            Method::POST,
            "/api/titles",
            Some(json!({ "name": "Heat", "type": "movie", "category": "drama", "rating": 11 })),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(title_form(
            Method::POST,
            "/api/titles",
            Some(json!({ "name": "Heat", "type": "documentary", "category": "drama", "rating": 5 })),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.repo.all_titles().await.is_empty());
}

#[tokio::test]
async fn test_list_filters_from_query_string() {
    let app = signed_in_app("alice@example.com").await;
    create(&app, heat()).await;
    create(
        &app,
        json!({ "name": "Dune", "type": "movie", "category": "assistir", "rating": 0 }),
    )
    .await;
    create(
        &app,
        json!({ "name": "Lost", "type": "series", "category": "drama", "rating": 7 }),
    )
    .await;

    let all = body_json(app.send(get("/api/titles?sort=name_asc")).await).await;
    let names: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Heat", "Lost"]);

    let series = body_json(app.send(get("/api/titles?type=series")).await).await;
    assert_eq!(series.as_array().unwrap().len(), 1);
    assert_eq!(series[0]["name"], "Lost");

    let watchlist = body_json(app.send(get("/api/titles?category=assistir")).await).await;
    assert_eq!(watchlist[0]["name"], "Dune");

    let search = body_json(app.send(get("/api/titles?search=HEA")).await).await;
    assert_eq!(search.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconcile_endpoint_moves_stale_titles() {
    let app = signed_in_app("alice@example.com").await;
    let title = create(
        &app,
        json!({ "name": "It", "type": "movie", "category": "terror", "rating": 7 }),
    )
    .await;

    let response = app.send(empty(Method::POST, "/api/titles/reconcile")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["reassigned"], 1);
    assert_eq!(report["fallback"], "ação", "the watchlist is skipped");

    let stored = body_json(app.send(get(&format!("/api/titles/{}", title.id))).await).await;
    assert_eq!(stored["category"], "ação");

    let catalog = body_json(app.send(get("/api/titles")).await).await;
    assert!(catalog.as_array().unwrap().iter().any(|t| t["name"] == "It"));
}

#[tokio::test]
async fn test_taxonomy_lists_for_members() {
    let app = signed_in_app("alice@example.com").await;

    let categories = body_json(app.send(get("/api/categories")).await).await;
    let names: Vec<&str> = categories
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    // Bytewise: the accented "ação" sorts after "assistir".
    assert_eq!(names, ["assistir", "ação", "comédia", "drama"]);

    let types = body_json(app.send(get("/api/types")).await).await;
    assert_eq!(types.as_array().unwrap().len(), 3);
}

// --- Admin ---

#[tokio::test]
async fn test_admin_api_forbidden_for_members() {
    let app = signed_in_app("alice@example.com").await;
    for request in [
        get("/api/admin/stats"),
        get("/api/admin/users"),
        get("/api/admin/categories"),
        json(Method::POST, "/api/admin/categories", json!({ "name": "terror" })),
    ] {
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_admin_api_unauthorized_when_signed_out() {
    let app = signed_out_app().await;
    let response = app.send(get("/api/admin/stats")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_stats_exclude_trash() {
    let app = signed_in_app("root@admin.com").await;
    create(&app, heat()).await;
    let trashed = create(&app, heat()).await;
    app.send(empty(Method::POST, &format!("/api/titles/{}/trash", trashed.id)))
        .await;

    let response = app.send(get("/api/admin/stats")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total_titles"], 1);
    assert_eq!(stats["total_categories"], 4);
    assert_eq!(stats["total_types"], 3);
    assert_eq!(stats["total_users"], 1);

    let drama = stats["titles_per_category"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "drama")
        .unwrap()
        .clone();
    assert_eq!(drama["count"], 1);
}

#[tokio::test]
async fn test_admin_manages_categories() {
    let app = signed_in_app("root@admin.com").await;

    let response = app
        .send(json(Method::POST, "/api/admin/categories", json!({ "name": " terror " })))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["name"], "terror");

    let duplicate = app
        .send(json(Method::POST, "/api/admin/categories", json!({ "name": "terror" })))
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let blank = app
        .send(json(Method::POST, "/api/admin/categories", json!({ "name": "  " })))
        .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let id = created["id"].as_str().unwrap();
    let response = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/categories/{}", id),
            json!({ "name": "horror" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "horror");

    let response = app
        .send(empty(Method::DELETE, &format!("/api/admin/categories/{}", id)))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .send(empty(Method::DELETE, &format!("/api/admin/categories/{}", id)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let missing = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/types/{}", Uuid::new_v4()),
            json!({ "name": "anime" }),
        ))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_manages_types() {
    let app = signed_in_app("root@admin.com").await;
    let response = app
        .send(json(Method::POST, "/api/admin/types", json!({ "name": "anime" })))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let types = app.repo.list_entries(Taxonomy::Types).await.unwrap();
    assert!(types.iter().any(|t| t.name == "anime"));
}

#[tokio::test]
async fn test_admin_user_management() {
    let auth = MockAuthBackend::new()
        .with_active_session("root@admin.com", PASSWORD)
        .with_user("alice@example.com", PASSWORD);
    let alice = auth.user("alice@example.com").unwrap();
    let app = common::app_with(auth, MockStorageService::new()).await;

    let users = body_json(app.send(get("/api/admin/users")).await).await;
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 2);
    let root = users.iter().find(|u| u["email"] == "root@admin.com").unwrap();
    assert_eq!(root["is_admin"], true);
    assert_eq!(root["bootstrap_admin"], true);

    // Grant, then revoke.
    let response = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/users/{}/admin", alice.id),
            json!({ "is_admin": true }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_admin"], true);
    assert!(app.repo.has_admin_role(alice.id).await.unwrap());

    let response = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/users/{}/admin", alice.id),
            json!({ "is_admin": false }),
        ))
        .await;
    assert_eq!(body_json(response).await["is_admin"], false);

    // The bootstrap admin cannot be revoked.
    let root_id = root["id"].as_str().unwrap();
    let response = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/users/{}/admin", root_id),
            json!({ "is_admin": false }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(json(
            Method::PUT,
            &format!("/api/admin/users/{}/admin", Uuid::new_v4()),
            json!({ "is_admin": true }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_creates_users() {
    let app = signed_in_app("root@admin.com").await;

    let response = app
        .send(json(
            Method::POST,
            "/api/admin/users",
            json!({ "email": "editor@example.com", "password": "longenough", "is_admin": true }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["is_admin"], true);
    assert_eq!(created["bootstrap_admin"], false);

    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    assert!(app.repo.has_admin_role(id).await.unwrap());

    let response = app
        .send(json(
            Method::POST,
            "/api/admin/users",
            json!({ "email": "short@example.com", "password": "123" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// --- Origin Checks ---

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/titles")
        .header(header::HOST, "127.0.0.1:3000")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap()
}

fn titles_from(origin: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/titles")
        .header(header::HOST, host)
        .header(header::ORIGIN, origin)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cross_origin_preflight_is_not_allowed() {
    let app = signed_in_app("alice@example.com").await;
    let response = app.send(preflight("https://evil.example")).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn test_cross_origin_request_cannot_read_the_catalog() {
    let app = signed_in_app("alice@example.com").await;
    create(&app, heat()).await;

    let response = app
        .send(titles_from("https://evil.example", "127.0.0.1:3000"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "FORBIDDEN");

    // An opaque origin, as sandboxed frames send.
    let response = app.send(titles_from("null", "127.0.0.1:3000")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_same_origin_request_is_served() {
    let app = signed_in_app("alice@example.com").await;
    create(&app, heat()).await;

    let response = app
        .send(titles_from("http://127.0.0.1:3000", "127.0.0.1:3000"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await[0]["name"], "Heat");
}

#[tokio::test]
async fn test_rebound_host_is_refused() {
    let app = signed_in_app("alice@example.com").await;
    let response = app
        .send(titles_from("http://attacker.example", "attacker.example"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut request = get("/api/titles");
    request
        .headers_mut()
        .insert(header::HOST, "attacker.example:3000".parse().unwrap());
    assert_eq!(app.send(request).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_configured_origin_gets_cors_headers() {
    let config = AppConfig {
        cors_origin: Some("http://localhost:5173".into()),
        ..AppConfig::default()
    };
    let app = signed_in_app_with_config(config).await;

    let allowed = app.send(preflight("http://localhost:5173")).await;
    assert_eq!(
        allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:5173"
    );

    let other = app.send(preflight("https://evil.example")).await;
    assert!(
        other
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );

    let response = app
        .send(titles_from("http://localhost:5173", "127.0.0.1:3000"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
