use std::{env, net::SocketAddr, path::PathBuf};

/// AppConfig
///
/// The application's configuration, loaded once at startup and shared read-only through
/// `AppState`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: Env,
    // Address the HTTP server listens on. Always loopback: every request acts as the one
    // signed-in user.
    pub bind_addr: String,
    // Browser origin allowed to call the API cross-origin (e.g. a dev frontend). None means
    // same-origin only.
    pub cors_origin: Option<String>,
    // Postgres connection string. Local runs without it use the in-memory repository.
    pub db_url: Option<String>,
    // Supabase project URL (GoTrue lives under /auth/v1). Local runs without it use the
    // in-memory auth backend.
    pub supabase_url: Option<String>,
    pub supabase_anon_key: String,
    // Needed only by the admin user endpoints.
    pub supabase_service_key: Option<String>,
    // Secret the access tokens are signed with.
    pub jwt_secret: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_key: String,
    pub s3_secret: String,
    pub s3_bucket: String,
    // Prefix under which uploaded objects are publicly readable.
    pub s3_public_url: String,
    // Where the refresh token is kept between runs.
    pub session_file: Option<PathBuf>,
}

/// Env
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const DEFAULT_BUCKET: &str = "posters";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

impl Default for AppConfig {
    /// Local settings that need no environment, for tests.
    fn default() -> Self {
        Self {
            env: Env::Local,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            cors_origin: None,
            db_url: None,
            supabase_url: None,
            supabase_anon_key: "local-anon-key".to_string(),
            supabase_service_key: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_key: "admin".to_string(),
            s3_secret: "password".to_string(),
            s3_bucket: DEFAULT_BUCKET.to_string(),
            s3_public_url: "http://localhost:9000".to_string(),
            session_file: None,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the environment.
    ///
    /// # Panics
    /// In production, panics when a required variable is missing so the server never starts
    /// half-configured. In every environment, panics when `BIND_ADDR` is not a loopback
    /// address.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let bind_addr = optional("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        if !is_loopback_addr(&bind_addr) {
            panic!("FATAL: BIND_ADDR must be a loopback address, got '{}'.", bind_addr);
        }
        let cors_origin = optional("CORS_ORIGIN").map(|o| o.trim_end_matches('/').to_string());
        let session_file = optional("SESSION_FILE").map(PathBuf::from);
        let supabase_service_key = optional("SUPABASE_SERVICE_ROLE_KEY");

        match env {
            Env::Local => {
                let defaults = Self::default();
                Self {
                    env: Env::Local,
                    bind_addr,
                    cors_origin,
                    db_url: optional("DATABASE_URL"),
                    supabase_url: optional("SUPABASE_URL"),
                    supabase_anon_key: optional("SUPABASE_ANON_KEY")
                        .unwrap_or(defaults.supabase_anon_key),
                    supabase_service_key,
                    jwt_secret: optional("SUPABASE_JWT_SECRET").unwrap_or(defaults.jwt_secret),
                    s3_bucket: optional("S3_BUCKET_NAME").unwrap_or(defaults.s3_bucket),
                    session_file: session_file.or_else(|| Some(PathBuf::from(".session"))),
                    ..defaults
                }
            }
            Env::Production => {
                let project_url = required("SUPABASE_URL");
                let project_url = project_url.trim_end_matches('/').to_string();

                Self {
                    env: Env::Production,
                    bind_addr,
                    cors_origin,
                    db_url: Some(required("DATABASE_URL")),
                    supabase_anon_key: required("SUPABASE_ANON_KEY"),
                    supabase_service_key,
                    jwt_secret: required("SUPABASE_JWT_SECRET"),
                    // Supabase Storage speaks S3 under /storage/v1/s3 and serves public
                    // objects under /storage/v1/object/public.
                    s3_endpoint: format!("{}/storage/v1/s3", project_url),
                    s3_region: "stub".to_string(),
                    s3_key: required("S3_ACCESS_KEY"),
                    s3_secret: required("S3_SECRET_KEY"),
                    s3_bucket: optional("S3_BUCKET_NAME")
                        .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                    s3_public_url: format!("{}/storage/v1/object/public", project_url),
                    supabase_url: Some(project_url),
                    session_file,
                }
            }
        }
    }
}

/// is_loopback_addr
///
/// True for `127.0.0.0/8`, `[::1]`, and `localhost` socket addresses.
pub fn is_loopback_addr(addr: &str) -> bool {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().is_loopback();
    }
    addr.rsplit_once(':')
        .is_some_and(|(host, port)| host.eq_ignore_ascii_case("localhost") && port.parse::<u16>().is_ok())
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &str) -> String {
    optional(key).unwrap_or_else(|| panic!("FATAL: {} must be set in production.", key))
}
