//! The application's single source of truth for "who is signed in, and are they an admin".

use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{
    auth::{AuthEvent, AuthState},
    errors::AuthError,
    listener::ListenerHandle,
    models::User,
    repository::RepositoryState,
};

/// Email suffix that grants admin rights without a role-table entry.
pub const ADMIN_EMAIL_SUFFIX: &str = "@admin.com";

/// True for emails carrying the bootstrap admin suffix.
pub fn is_bootstrap_admin(email: &str) -> bool {
    email.to_ascii_lowercase().ends_with(ADMIN_EMAIL_SUFFIX)
}

/// derive_admin
///
/// Admin status as a pure function of the user's email and the role table. The role table is
/// authoritative for granted rights; the email suffix only bootstraps the first admins and so
/// can never be outvoted by a missing role row.
pub fn derive_admin(email: &str, has_admin_role: bool) -> bool {
    has_admin_role || is_bootstrap_admin(email)
}

/// SessionSnapshot
///
/// What consumers observe. `user` and `is_admin` are meaningless while `loading` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_admin: bool,
    pub loading: bool,
}

impl SessionSnapshot {
    pub fn checking() -> Self {
        Self {
            user: None,
            is_admin: false,
            loading: true,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            user: None,
            is_admin: false,
            loading: false,
        }
    }

    pub fn signed_in(user: User, is_admin: bool) -> Self {
        Self {
            user: Some(user),
            is_admin,
            loading: false,
        }
    }
}

struct SessionInner {
    auth: AuthState,
    repo: RepositoryState,
    state: watch::Sender<SessionSnapshot>,
    listener: Mutex<Option<ListenerHandle>>,
}

/// SessionStore
///
/// Shared-by-reference session container. Clones share one state. Lifecycle:
/// `new` (checking) → `start` (resolved, listening to auth events) → `shutdown`.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    pub fn new(auth: AuthState, repo: RepositoryState) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::checking());
        Self {
            inner: Arc::new(SessionInner {
                auth,
                repo,
                state,
                listener: Mutex::new(None),
            }),
        }
    }

    /// start
    ///
    /// Resolves the initial session and begins following backend auth events. Subscribing
    /// happens before the fetch so that no event emitted in between is lost.
    pub async fn start(&self) {
        let events = self.inner.auth.subscribe();

        let initial = match self.inner.auth.get_session().await {
            Ok(session) => session.map(|s| s.user),
            Err(e) => {
                warn!(error = %e, "could not fetch the current session, continuing signed out");
                None
            }
        };
        self.publish_user(initial).await;

        let weak = Arc::downgrade(&self.inner);
        let handle = ListenerHandle::spawn(listen_for_auth_events(weak, events));
        if let Some(previous) = self.lock_listener().replace(handle) {
            previous.stop();
        }
        info!("session store started");
    }

    /// Stops following auth events. The last published state stays readable.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.stop();
            debug!("session listener stopped");
        }
    }

    /// The current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to state changes. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Waits until the first session fetch has completed.
    pub async fn resolved(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| !s.loading).await {
            Ok(snapshot) => snapshot.clone(),
            // The sender lives inside `self`, so it cannot be gone here.
            Err(_) => self.snapshot(),
        }
    }

    /// The signed-in user, or `None` while loading or signed out.
    pub fn current_user(&self) -> Option<User> {
        let snapshot = self.inner.state.borrow();
        if snapshot.loading {
            return None;
        }
        snapshot.user.clone()
    }

    // --- Actions ---

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self.inner.auth.sign_up(email, password).await?;
        info!(user_id = %user.id, "account registered");
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionSnapshot, AuthError> {
        let session = self.inner.auth.sign_in(email, password).await?;
        info!(user_id = %session.user.id, "signed in");
        Ok(self.publish_user(Some(session.user)).await)
    }

    /// sign_out
    ///
    /// Local state is cleared whatever the backend answers. A backend reporting that there
    /// is no session counts as success.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.inner.auth.sign_out().await;
        self.inner.state.send_replace(SessionSnapshot::signed_out());

        match result {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(AuthError::SessionNotFound) => {
                debug!("backend had no session, sign-out treated as complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "backend sign-out failed, local session cleared anyway");
                Err(e)
            }
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.inner.auth.request_password_reset(email).await
    }

    /// Verifies a recovery code; success signs the user in.
    pub async fn verify_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<SessionSnapshot, AuthError> {
        let session = self.inner.auth.verify_reset_code(email, code).await?;
        Ok(self.publish_user(Some(session.user)).await)
    }

    pub async fn update_password(&self, password: &str) -> Result<(), AuthError> {
        self.inner.auth.update_password(password).await
    }

    /// Re-reads the role table for the current user and republishes.
    pub async fn refresh_admin_status(&self) -> SessionSnapshot {
        let snapshot = self.snapshot();
        if snapshot.loading {
            return snapshot;
        }
        self.publish_user(snapshot.user).await
    }

    // --- Internals ---

    /// Publishes user and admin flag in one update, so no consumer sees a user whose role
    /// has not been derived yet.
    async fn publish_user(&self, user: Option<User>) -> SessionSnapshot {
        let snapshot = match user {
            Some(user) => {
                let is_admin = self.resolve_admin(&user).await;
                SessionSnapshot::signed_in(user, is_admin)
            }
            None => SessionSnapshot::signed_out(),
        };
        self.inner.state.send_replace(snapshot.clone());
        snapshot
    }

    async fn resolve_admin(&self, user: &User) -> bool {
        let has_role = match self.inner.repo.has_admin_role(user.id).await {
            Ok(has_role) => has_role,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "role lookup failed, using email only");
                false
            }
        };
        derive_admin(&user.email, has_role)
    }

    /// Like `publish_user`, but drops the result if the state changed during the role
    /// lookup. Used by the listener, which must not overwrite a newer sign-in or sign-out.
    async fn publish_user_if_unchanged(&self, user: User) {
        let before = self.snapshot();
        let is_admin = self.resolve_admin(&user).await;
        let next = SessionSnapshot::signed_in(user, is_admin);

        let published = self.inner.state.send_if_modified(|current| {
            if *current != before || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if !published {
            debug!("auth event superseded or unchanged, nothing published");
        }
    }

    async fn handle_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                let current = self.snapshot();
                let same_user = current.user.as_ref().is_some_and(|u| u.id == session.user.id);
                if !current.loading && same_user {
                    debug!(user_id = %session.user.id, "auth event: already signed in");
                    return;
                }
                debug!(user_id = %session.user.id, "auth event: signed in");
                self.publish_user_if_unchanged(session.user).await;
            }
            AuthEvent::TokenRefreshed(session) => {
                debug!(user_id = %session.user.id, "auth event: token refreshed");
                self.publish_user_if_unchanged(session.user).await;
            }
            AuthEvent::SignedOut => {
                debug!("auth event: signed out");
                self.inner.state.send_replace(SessionSnapshot::signed_out());
            }
        }
    }

    async fn resync(&self) {
        match self.inner.auth.get_session().await {
            Ok(session) => {
                self.publish_user(session.map(|s| s.user)).await;
            }
            Err(e) => warn!(error = %e, "session resync failed"),
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<ListenerHandle>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn listen_for_auth_events(
    store: Weak<SessionInner>,
    mut events: tokio::sync::broadcast::Receiver<AuthEvent>,
) {
    loop {
        let received = events.recv().await;

        // A dropped store means the application is gone; stop instead of touching it.
        let Some(inner) = store.upgrade() else {
            break;
        };
        let store = SessionStore { inner };

        match received {
            Ok(event) => store.handle_event(event).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "auth events lagged, resyncing session");
                store.resync().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
