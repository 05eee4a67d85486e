use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// AuthError
///
/// Failures reported by the auth backend (GoTrue or the in-memory mock).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The backend has no active session for this client. Sign-out treats this as success.
    #[error("no active session")]
    SessionNotFound,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("auth request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("auth service unreachable: {0}")]
    Transport(String),

    #[error("admin auth api requires SUPABASE_SERVICE_ROLE_KEY")]
    MissingServiceKey,
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}

/// RepositoryError
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("duplicate value: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// StorageError
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

/// CatalogError
///
/// Returned by every `CatalogStore` operation.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sign in to manage your titles")]
    AuthRequired,

    #[error("{0}")]
    Validation(String),

    #[error("title {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// AppError
///
/// The handler-facing error. Every variant maps to one HTTP status and a stable error code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("admin privileges required")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("session is still loading")]
    SessionPending,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::AuthRequired => AppError::Unauthorized,
            CatalogError::Validation(msg) => AppError::Validation(msg),
            CatalogError::NotFound(_) => AppError::NotFound,
            CatalogError::Storage(e) => AppError::Storage(e),
            CatalogError::Repository(e) => AppError::Repository(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::SessionPending => (StatusCode::SERVICE_UNAVAILABLE, "SESSION_PENDING"),
            AppError::Auth(auth) => match auth {
                AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
                AuthError::SessionNotFound => (StatusCode::UNAUTHORIZED, "SESSION_NOT_FOUND"),
                AuthError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
                AuthError::Rejected { .. } => (StatusCode::BAD_REQUEST, "AUTH_REJECTED"),
                AuthError::Transport(_) => (StatusCode::BAD_GATEWAY, "AUTH_UNAVAILABLE"),
                AuthError::MissingServiceKey => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_MISCONFIGURED")
                }
            },
            AppError::Repository(RepositoryError::Conflict(_)) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            AppError::Repository(RepositoryError::Database(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
            AppError::Storage(_) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Database details stay in the logs.
        let message = match &self {
            AppError::Repository(RepositoryError::Database(e)) => {
                tracing::error!(error = ?e, "database failure");
                "internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(error = %other, "request failed");
                }
                other.to_string()
            }
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

/// Result alias for handlers.
pub type AppResult<T> = Result<T, AppError>;

/// Result alias for repository calls.
pub type RepoResult<T> = Result<T, RepositoryError>;
