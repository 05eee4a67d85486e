use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    errors::{AppError, AuthError},
    models::{AuthSession, User},
    session::SessionStore,
};

/// Claims
///
/// The subset of the auth backend's access-token payload this application reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's UUID.
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration time (unix seconds).
    pub exp: usize,
    /// Issued at (unix seconds).
    pub iat: usize,
}

/// decode_access_token
///
/// Verifies an HS256 access token against the project secret and returns its claims.
/// Expired tokens are rejected.
pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Supabase tokens carry `aud: authenticated`; the audience is not part of our trust decision.
    validation.validate_aud = false;

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            ErrorKind::ExpiredSignature => Err(AuthError::InvalidToken("token expired".into())),
            _ => Err(AuthError::InvalidToken(e.to_string())),
        },
    }
}

/// AuthEvent
///
/// Session changes pushed by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

/// AuthBackend
///
/// The auth half of the backend-as-a-service. The real implementation is
/// `gotrue::GoTrueAuthClient`; `MockAuthBackend` keeps everything in memory.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The current session, restoring it from persisted state when possible.
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError>;

    /// Subscribes to session changes. Drop the receiver to unsubscribe.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError>;
    /// Exchanges an emailed recovery code for a session.
    async fn verify_reset_code(&self, email: &str, code: &str) -> Result<AuthSession, AuthError>;
    async fn update_password(&self, password: &str) -> Result<(), AuthError>;

    // --- Admin API ---
    async fn list_users(&self) -> Result<Vec<User>, AuthError>;
    async fn create_user(&self, email: &str, password: &str) -> Result<User, AuthError>;
}

/// AuthState
///
/// The shared handle to the auth backend.
pub type AuthState = Arc<dyn AuthBackend>;

// --- Request Extractors ---

/// AuthUser
///
/// The signed-in user behind an API request, resolved from the application's `SessionStore`.
///
/// Rejection: 503 while the session is still loading, 401 when nobody is signed in.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let snapshot = SessionStore::from_ref(state).snapshot();

        // Never decide on an unresolved session.
        if snapshot.loading {
            return Err(AppError::SessionPending);
        }

        let user = snapshot.user.ok_or(AppError::Unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            email: user.email,
            is_admin: snapshot.is_admin,
        })
    }
}

/// AdminUser
///
/// As `AuthUser`, additionally rejecting non-admins with 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

// --- The Mock Implementation (For Tests and Local Runs) ---

/// MockAuthBackend
///
/// In-memory accounts and a single current session. Emits the same events the real
/// backend does. Any reset code equal to `MockAuthBackend::RESET_CODE` is accepted.
pub struct MockAuthBackend {
    accounts: Mutex<HashMap<String, (User, String)>>,
    current: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
    fail_get_session: bool,
}

impl Default for MockAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthBackend {
    pub const RESET_CODE: &'static str = "123456";

    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            fail_get_session: false,
        }
    }

    /// A backend whose session lookup always fails.
    pub fn new_failing() -> Self {
        Self {
            fail_get_session: true,
            ..Self::new()
        }
    }

    /// Registers an account.
    pub fn with_user(self, email: &str, password: &str) -> Self {
        self.insert_account(email, password);
        self
    }

    /// Registers an account and makes it the active session.
    pub fn with_active_session(self, email: &str, password: &str) -> Self {
        let user = self.insert_account(email, password);
        *lock(&self.current) = Some(Self::session_for(user));
        self
    }

    /// Pushes an event as if the backend emitted it.
    pub fn emit(&self, event: AuthEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Number of live event subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Drops the backend-side session silently, as an expired server session would.
    pub fn expire_session(&self) {
        lock(&self.current).take();
    }

    pub fn user(&self, email: &str) -> Option<User> {
        lock(&self.accounts)
            .get(&email.to_ascii_lowercase())
            .map(|(user, _)| user.clone())
    }

    fn insert_account(&self, email: &str, password: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        lock(&self.accounts).insert(
            email.to_ascii_lowercase(),
            (user.clone(), password.to_string()),
        );
        user
    }

    fn session_for(user: User) -> AuthSession {
        AuthSession {
            access_token: format!("mock-access-{}", Uuid::new_v4()),
            refresh_token: format!("mock-refresh-{}", Uuid::new_v4()),
            expires_at: chrono::Utc::now().timestamp() + 3600,
            user,
        }
    }

    fn start_session(&self, user: User) -> AuthSession {
        let session = Self::session_for(user);
        *lock(&self.current) = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        session
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AuthBackend for MockAuthBackend {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        if self.fail_get_session {
            return Err(AuthError::Transport("mock auth backend offline".into()));
        }
        Ok(lock(&self.current).clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        if lock(&self.accounts).contains_key(&email.to_ascii_lowercase()) {
            return Err(AuthError::Rejected {
                status: 422,
                message: "User already registered".into(),
            });
        }
        Ok(self.insert_account(email, password))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = match lock(&self.accounts).get(&email.to_ascii_lowercase()) {
            Some((user, stored)) if stored == password => user.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };
        Ok(self.start_session(user))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let had_session = lock(&self.current).take().is_some();
        self.emit(AuthEvent::SignedOut);
        if had_session {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    async fn request_password_reset(&self, _email: &str) -> Result<(), AuthError> {
        // Mirrors GoTrue: unknown emails are not disclosed.
        Ok(())
    }

    async fn verify_reset_code(&self, email: &str, code: &str) -> Result<AuthSession, AuthError> {
        if code != Self::RESET_CODE {
            return Err(AuthError::Rejected {
                status: 403,
                message: "Token has expired or is invalid".into(),
            });
        }
        let user = self.user(email).ok_or(AuthError::InvalidCredentials)?;
        Ok(self.start_session(user))
    }

    async fn update_password(&self, password: &str) -> Result<(), AuthError> {
        let email = lock(&self.current)
            .as_ref()
            .map(|s| s.user.email.to_ascii_lowercase())
            .ok_or(AuthError::SessionNotFound)?;
        if let Some(entry) = lock(&self.accounts).get_mut(&email) {
            entry.1 = password.to_string();
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let mut users: Vec<User> = lock(&self.accounts)
            .values()
            .map(|(user, _)| user.clone())
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        self.sign_up(email, password).await
    }
}
