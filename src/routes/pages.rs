use crate::{AppState, pages};
use axum::{Router, routing::get};

/// Page Router Module
///
/// No middleware: each page decides between rendering, redirecting, and a "checking"
/// placeholder itself, so a loading session never causes a redirect.
pub fn page_routes() -> Router<AppState> {
    Router::new()
        // Public-only: signed-in users are sent to /catalog.
        .route("/", get(pages::landing))
        .route("/login", get(pages::login))
        // Authenticated: anonymous users are sent to /.
        .route("/catalog", get(pages::catalog))
        .route("/trash", get(pages::trash))
        .route("/titles/{id}/edit", get(pages::edit_title))
        // Admin-only: non-admins are sent to /catalog.
        .route("/admin", get(pages::admin))
}
