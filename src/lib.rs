use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Backend seams and their adapters.
pub mod auth;
pub mod gotrue;
pub mod memory;
pub mod repository;
pub mod storage;

// Application state containers.
pub mod catalog;
pub mod guards;
pub mod session;
pub mod view;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod listener;
pub mod models;
pub mod pages;

pub mod routes;
use auth::{AdminUser, AuthState, AuthUser};
use config::is_loopback_addr;
use errors::AppError;
use routes::{admin, authenticated, pages as page_routes, public};

// --- Public Re-exports ---

pub use catalog::CatalogStore;
pub use config::AppConfig;
pub use repository::{PostgresRepository, RepositoryState};
pub use session::SessionStore;
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for the JSON API, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_session, handlers::sign_up, handlers::sign_in, handlers::sign_out,
        handlers::request_password_reset, handlers::verify_reset_code, handlers::update_password,
        handlers::list_titles, handlers::create_title, handlers::get_title,
        handlers::update_title, handlers::trash_title, handlers::restore_title,
        handlers::delete_title, handlers::list_trash, handlers::reconcile_titles,
        handlers::list_categories, handlers::list_types, handlers::get_admin_stats,
        handlers::list_taxonomy, handlers::create_taxonomy_entry,
        handlers::rename_taxonomy_entry, handlers::delete_taxonomy_entry,
        handlers::list_users, handlers::create_user, handlers::set_user_admin
    ),
    components(
        schemas(
            models::User, models::Title, models::TitleType, models::CreateTitleRequest,
            models::UpdateTitleRequest, models::Taxonomy, models::TaxonomyEntry,
            models::Credentials, models::PasswordResetRequest, models::VerifyResetCodeRequest,
            models::UpdatePasswordRequest, models::TaxonomyNameRequest,
            models::CreateUserRequest, models::SetAdminRequest, models::NamedCount,
            models::AdminStats, models::UserSummary, session::SessionSnapshot,
            catalog::ReconcileReport, view::SortOrder,
        )
    ),
    tags(
        (name = "media-catalog", description = "Personal media catalog API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Everything a request handler can reach. Cloning is cheap: every field is a shared handle.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub storage: StorageState,
    pub auth: AuthState,
    /// The application's single session.
    pub session: SessionStore,
    /// The signed-in user's titles.
    pub catalog: CatalogStore,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the session and catalog stores over the given backends. The session starts in
    /// the loading state until `session.start()` resolves it.
    pub fn new(
        repo: RepositoryState,
        storage: StorageState,
        auth: AuthState,
        config: AppConfig,
    ) -> Self {
        let session = SessionStore::new(auth.clone(), repo.clone());
        let catalog = CatalogStore::new(repo.clone(), storage.clone(), session.clone());
        Self {
            repo,
            storage,
            auth,
            session,
            catalog,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> AuthState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(app_state: &AppState) -> SessionStore {
        app_state.session.clone()
    }
}

impl FromRef<AppState> for CatalogStore {
    fn from_ref(app_state: &AppState) -> CatalogStore {
        app_state.catalog.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects requests of the authenticated group before they reach a handler: 503 while the
/// session is loading, 401 with nobody signed in.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// As `auth_middleware`, additionally rejecting non-admins with 403.
async fn admin_middleware(_admin: AdminUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// reject_foreign_origin
///
/// Every request acts as the signed-in user, so only the server's own pages (or the
/// configured `CORS_ORIGIN`) may call it from a browser. A non-loopback `Host` is refused
/// too, which stops DNS-rebound pages. Requests without an `Origin` header (curl, tests)
/// pass.
async fn reject_foreign_origin(
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let origin = headers.get(header::ORIGIN).map(|v| v.to_str().unwrap_or("null"));

    let host_ok = host.is_none_or(is_loopback_host);
    let origin_ok = origin
        .is_none_or(|origin| origin_allowed(origin, host, config.cors_origin.as_deref()));

    if !(host_ok && origin_ok) {
        tracing::warn!(?host, ?origin, uri = %request.uri(), "foreign origin refused");
        return AppError::Forbidden.into_response();
    }
    next.run(request).await
}

fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<std::net::IpAddr>().is_ok_and(|ip| ip.is_loopback())
        || is_loopback_addr(host)
}

fn origin_allowed(origin: &str, host: Option<&str>, cors_origin: Option<&str>) -> bool {
    if cors_origin == Some(origin) {
        return true;
    }
    let Some(host) = host else {
        return false;
    };
    origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .is_some_and(|authority| authority.eq_ignore_ascii_case(host))
}

/// create_router
///
/// Assembles the route groups, their access layers, and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = state
        .config
        .cors_origin
        .as_deref()
        .and_then(|origin| HeaderValue::from_str(origin).ok())
        .map(|origin| {
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE])
        });

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(page_routes::page_routes())
        .merge(authenticated::authenticated_routes().route_layer(
            middleware::from_fn_with_state(state.clone(), auth_middleware),
        ))
        .nest(
            "/api/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin_middleware,
            )),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            reject_foreign_origin,
        ))
        .with_state(state);

    let router = base_router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace_span_logger)
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(tower_http::LatencyUnit::Millis),
                    ),
            )
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    );

    // Without CORS_ORIGIN no CORS headers are sent: browsers keep to same-origin.
    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// trace_span_logger
///
/// Request span carrying method, uri, and the `x-request-id` set by the layer above, so
/// every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
