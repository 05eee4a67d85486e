use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe.
        .route("/health", get(|| async { "ok" }))
        // GET /api/session
        // Current user, admin flag, and whether the session is still loading.
        .route("/api/session", get(handlers::get_session))
        .route("/api/auth/sign-up", post(handlers::sign_up))
        .route("/api/auth/sign-in", post(handlers::sign_in))
        // POST /api/auth/sign-out
        // Clears the local session even if the backend has already forgotten it.
        .route("/api/auth/sign-out", post(handlers::sign_out))
        // Password recovery: request a code by email, then trade it for a session.
        .route("/api/auth/password-reset", post(handlers::request_password_reset))
        .route("/api/auth/verify-reset-code", post(handlers::verify_reset_code))
}
