use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Nested under `/api/admin` and wrapped in `admin_middleware`: signed-in non-admins get 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /api/admin/stats
        // Title, taxonomy, and user counts for the dashboard.
        .route("/stats", get(handlers::get_admin_stats))
        // Accounts and their admin status.
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/users/{id}/admin", put(handlers::set_user_admin))
        // GET|POST /api/admin/{categories|types}
        // The managed name lists. Static segments above take precedence over `{taxonomy}`.
        .route(
            "/{taxonomy}",
            get(handlers::list_taxonomy).post(handlers::create_taxonomy_entry),
        )
        .route(
            "/{taxonomy}/{id}",
            put(handlers::rename_taxonomy_entry).delete(handlers::delete_taxonomy_entry),
        )
}
