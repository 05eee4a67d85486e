use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Largest accepted title form, poster included.
const TITLE_FORM_LIMIT: usize = 10 * 1024 * 1024;

/// Authenticated Router Module
///
/// Every handler here acts on the signed-in user's own titles. The router is wrapped in
/// `auth_middleware`, so requests without a user never reach a handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/auth/password", put(handlers::update_password))
        // GET /api/titles?type=&category=&search=&sort=
        // Active titles through the catalog view filters.
        // POST /api/titles
        // Multipart form: JSON `title` part plus optional `image` file.
        .route(
            "/api/titles",
            get(handlers::list_titles).post(handlers::create_title),
        )
        .route(
            "/api/titles/{id}",
            get(handlers::get_title)
                .put(handlers::update_title)
                .delete(handlers::delete_title),
        )
        // Soft delete and its inverse.
        .route("/api/titles/{id}/trash", post(handlers::trash_title))
        .route("/api/titles/{id}/restore", post(handlers::restore_title))
        .route("/api/titles/reconcile", post(handlers::reconcile_titles))
        .route("/api/trash", get(handlers::list_trash))
        .route("/api/categories", get(handlers::list_categories))
        .route("/api/types", get(handlers::list_types))
        .layer(DefaultBodyLimit::max(TITLE_FORM_LIMIT))
}
