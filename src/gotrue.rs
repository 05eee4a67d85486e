use std::{
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthBackend, AuthEvent, decode_access_token},
    errors::AuthError,
    listener::ListenerHandle,
    models::{AuthSession, User},
};

/// Seconds before expiry at which the access token is renewed.
const REFRESH_MARGIN_SECS: i64 = 60;
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(5);
/// How often the refresher looks again when there is no session.
const IDLE_POLL: Duration = Duration::from_secs(30);
/// Page size requested from the admin user listing. The server may cap it lower.
const USERS_PER_PAGE: usize = 100;

// --- Wire formats ---

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl From<GoTrueUser> for User {
    fn from(user: GoTrueUser) -> Self {
        User {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

/// Sign-up answers with a session when email confirmation is off, otherwise with the user,
/// either bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    Wrapped { user: GoTrueUser },
    User(GoTrueUser),
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<GoTrueUser>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// GoTrueAuthClient
///
/// `AuthBackend` over the GoTrue REST API (Supabase Auth). Holds the application's single
/// session, verifies access tokens against the project JWT secret, and persists the refresh
/// token to `session_file` so a restart can restore the session.
pub struct GoTrueAuthClient {
    http: Client,
    base_url: String,
    anon_key: String,
    service_key: Option<String>,
    jwt_secret: String,
    session_file: Option<PathBuf>,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueAuthClient {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        service_key: Option<String>,
        jwt_secret: &str,
        session_file: Option<PathBuf>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        let (events, _) = broadcast::channel(32);

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            service_key,
            jwt_secret: jwt_secret.to_string(),
            session_file,
            session: RwLock::new(None),
            events,
        }
    }

    /// refresh_session
    ///
    /// Trades the stored refresh token for a new session and emits `TokenRefreshed`. A refresh
    /// token the backend no longer accepts ends the session (`SignedOut`, `Ok(None)`). Server
    /// errors and rate limiting are returned as errors with the session kept.
    pub async fn refresh_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let Some(refresh_token) = self.stored_refresh_token().await else {
            return Ok(None);
        };

        let request = self
            .public_request(self.http.post(self.url("/token?grant_type=refresh_token")))
            .json(&json!({ "refresh_token": refresh_token }));

        match self.send_token_request(request).await {
            Ok(session) => {
                self.store_session(session.clone()).await;
                debug!(user_id = %session.user.id, "access token refreshed");
                self.emit(AuthEvent::TokenRefreshed(session.clone()));
                Ok(Some(session))
            }
            Err(e) if ends_session(&e) => {
                info!(error = %e, "refresh token rejected, session ended");
                self.clear_session().await;
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// spawn_auto_refresh
    ///
    /// Renews the access token shortly before it expires. The task stops when the returned
    /// handle is dropped or the client is gone.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> ListenerHandle {
        let client = Arc::downgrade(self);
        ListenerHandle::spawn(auto_refresh(client))
    }

    async fn next_refresh_delay(&self) -> Duration {
        match self.session.read().await.as_ref() {
            Some(session) => {
                let due_in = session.expires_at - REFRESH_MARGIN_SECS - chrono::Utc::now().timestamp();
                Duration::from_secs(due_in.max(0) as u64).max(MIN_REFRESH_DELAY)
            }
            None => IDLE_POLL,
        }
    }

    async fn refresh_due(&self) -> bool {
        self.session.read().await.as_ref().is_some_and(|session| {
            chrono::Utc::now().timestamp() >= session.expires_at - REFRESH_MARGIN_SECS
        })
    }

    // --- Request plumbing ---

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    fn user_request(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    fn admin_request(&self, request: RequestBuilder) -> Result<RequestBuilder, AuthError> {
        let key = self
            .service_key
            .as_deref()
            .ok_or(AuthError::MissingServiceKey)?;
        Ok(request.header("apikey", key).bearer_auth(key))
    }

    async fn send_token_request(&self, request: RequestBuilder) -> Result<AuthSession, AuthError> {
        let response = check(request.send().await?).await?;
        let token = response.json::<TokenResponse>().await?;
        self.session_from(token)
    }

    /// Verifies the access token and checks it belongs to the returned user.
    fn session_from(&self, token: TokenResponse) -> Result<AuthSession, AuthError> {
        let claims = decode_access_token(&token.access_token, &self.jwt_secret)?;
        if claims.sub != token.user.id {
            return Err(AuthError::InvalidToken(
                "token subject does not match the user".into(),
            ));
        }

        let expires_at = token.expires_at.unwrap_or(claims.exp as i64);
        let mut user = User::from(token.user);
        if user.email.is_empty() {
            user.email = claims.email.unwrap_or_default();
        }

        Ok(AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user,
        })
    }

    // --- Session state ---

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    async fn stored_refresh_token(&self) -> Option<String> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Some(session.refresh_token.clone());
        }
        let path = self.session_file.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read session file");
                None
            }
        }
    }

    async fn store_session(&self, session: AuthSession) {
        if let Some(path) = &self.session_file {
            if let Err(e) = tokio::fs::write(path, &session.refresh_token).await {
                warn!(path = %path.display(), error = %e, "could not persist session");
            }
        }
        *self.session.write().await = Some(session);
    }

    async fn clear_session(&self) -> Option<AuthSession> {
        if let Some(path) = &self.session_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove session file"),
            }
        }
        self.session.write().await.take()
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    async fn start_session(&self, session: AuthSession) -> AuthSession {
        self.store_session(session.clone()).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        session
    }
}

async fn auto_refresh(client: Weak<GoTrueAuthClient>) {
    loop {
        let Some(strong) = client.upgrade() else {
            break;
        };
        let delay = strong.next_refresh_delay().await;
        drop(strong);

        tokio::time::sleep(delay).await;

        let Some(strong) = client.upgrade() else {
            break;
        };
        if strong.refresh_due().await {
            if let Err(e) = strong.refresh_session().await {
                warn!(error = %e, "scheduled token refresh failed");
            }
        }
    }
}

/// True when a refresh failure means the refresh token is dead, as opposed to the auth
/// server being unavailable.
fn ends_session(err: &AuthError) -> bool {
    match err {
        AuthError::InvalidCredentials | AuthError::SessionNotFound => true,
        AuthError::Rejected { status, .. } => matches!(status, 400 | 401 | 403),
        _ => false,
    }
}

/// Turns a non-success response into an `AuthError`.
async fn check(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    let code = body.error_code.clone().or_else(|| body.error.clone());
    let message = body
        .msg
        .or(body.message)
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    Err(match code.as_deref() {
        Some("invalid_credentials" | "invalid_grant") => AuthError::InvalidCredentials,
        Some("session_not_found") => AuthError::SessionNotFound,
        _ => AuthError::Rejected {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl AuthBackend for GoTrueAuthClient {
    /// The live session, refreshing it when expired or restoring it from the session file.
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        if let Some(session) = self.session.read().await.clone() {
            if session.expires_at > chrono::Utc::now().timestamp() {
                return Ok(Some(session));
            }
        }
        self.refresh_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let response = self
            .public_request(self.http.post(self.url("/signup")))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = check(response).await?;

        match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session(token) => {
                let session = self.session_from(token)?;
                Ok(self.start_session(session).await.user)
            }
            SignUpResponse::Wrapped { user } | SignUpResponse::User(user) => Ok(user.into()),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let request = self
            .public_request(self.http.post(self.url("/token?grant_type=password")))
            .json(&json!({ "email": email, "password": password }));
        let session = self.send_token_request(request).await?;
        Ok(self.start_session(session).await)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.clear_session().await;
        self.emit(AuthEvent::SignedOut);

        let Some(session) = previous else {
            return Err(AuthError::SessionNotFound);
        };

        let response = self
            .user_request(self.http.post(self.url("/logout")), &session.access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AuthError::SessionNotFound);
        }
        check(response).await?;
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let response = self
            .public_request(self.http.post(self.url("/recover")))
            .json(&json!({ "email": email }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn verify_reset_code(&self, email: &str, code: &str) -> Result<AuthSession, AuthError> {
        let request = self
            .public_request(self.http.post(self.url("/verify")))
            .json(&json!({ "type": "recovery", "email": email, "token": code }));
        let session = self.send_token_request(request).await?;
        Ok(self.start_session(session).await)
    }

    async fn update_password(&self, password: &str) -> Result<(), AuthError> {
        let access_token = self
            .access_token()
            .await
            .ok_or(AuthError::SessionNotFound)?;
        let response = self
            .user_request(self.http.put(self.url("/user")), &access_token)
            .json(&json!({ "password": password }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Every account, walking the paged admin listing. Ends at `X-Total-Count` when the
    /// server sends it, otherwise at the first short page.
    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let mut users: Vec<User> = Vec::new();

        for page in 1u32.. {
            let request = self
                .admin_request(self.http.get(self.url("/admin/users")))?
                .query(&[("page", page.to_string()), ("per_page", USERS_PER_PAGE.to_string())]);
            let response = check(request.send().await?).await?;
            let total = response
                .headers()
                .get("x-total-count")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<usize>().ok());

            let list = response.json::<UserList>().await?;
            let fetched = list.users.len();
            users.extend(list.users.into_iter().map(User::from));

            let done = match total {
                Some(total) => fetched == 0 || users.len() >= total,
                None => fetched < USERS_PER_PAGE,
            };
            if done {
                break;
            }
            debug!(page, fetched, "fetching next page of users");
        }

        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let request = self
            .admin_request(self.http.post(self.url("/admin/users")))?
            .json(&json!({ "email": email, "password": password, "email_confirm": true }));
        let response = check(request.send().await?).await?;
        Ok(response.json::<GoTrueUser>().await?.into())
    }
}
