//! Route authorization as a pure decision over a session snapshot.
//!
//! Every page request evaluates `authorize` against the current `SessionSnapshot`; there is no
//! navigation side effect to repeat, so re-evaluating while the session is loading can never
//! produce more than one redirect.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use crate::session::SessionSnapshot;

/// RouteAccess
///
/// Which audience a page is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// Landing and login pages: signed-in users are sent to their catalog.
    PublicOnly,
    Authenticated,
    /// Signed-in non-admins are sent to the catalog, not to login.
    AdminOnly,
}

/// Route
///
/// Redirect targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Catalog,
    Admin,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::Login => "/login",
            Route::Catalog => "/catalog",
            Route::Admin => "/admin",
        }
    }
}

/// RouteDecision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// The session is still loading. Render a placeholder, never redirect.
    Checking,
    Redirect(Route),
    Authorized,
}

/// authorize
pub fn authorize(access: RouteAccess, session: &SessionSnapshot) -> RouteDecision {
    if session.loading {
        return RouteDecision::Checking;
    }

    match (access, &session.user) {
        (RouteAccess::PublicOnly, Some(_)) => RouteDecision::Redirect(Route::Catalog),
        (RouteAccess::PublicOnly, None) => RouteDecision::Authorized,
        (RouteAccess::Authenticated | RouteAccess::AdminOnly, None) => {
            RouteDecision::Redirect(Route::Landing)
        }
        (RouteAccess::Authenticated, Some(_)) => RouteDecision::Authorized,
        (RouteAccess::AdminOnly, Some(_)) if session.is_admin => RouteDecision::Authorized,
        (RouteAccess::AdminOnly, Some(_)) => RouteDecision::Redirect(Route::Catalog),
    }
}

#[derive(Serialize)]
struct CheckingBody {
    state: &'static str,
}

/// Page
///
/// The HTTP rendering of a guarded page: a placeholder, a redirect, or the page's view model.
#[derive(Debug)]
pub enum Page<T> {
    Checking,
    Redirect(Route),
    Render(T),
}

impl<T> Page<T> {
    /// Turns a non-authorized decision into its page. `Authorized` yields `None`; the
    /// caller then builds the view.
    pub fn unless_authorized(decision: RouteDecision) -> Option<Self> {
        match decision {
            RouteDecision::Checking => Some(Page::Checking),
            RouteDecision::Redirect(route) => Some(Page::Redirect(route)),
            RouteDecision::Authorized => None,
        }
    }
}

impl<T: Serialize> IntoResponse for Page<T> {
    fn into_response(self) -> Response {
        match self {
            Page::Checking => (
                StatusCode::ACCEPTED,
                [(header::RETRY_AFTER, "1")],
                Json(CheckingBody { state: "checking" }),
            )
                .into_response(),
            Page::Redirect(route) => Redirect::to(route.path()).into_response(),
            Page::Render(view) => Json(view).into_response(),
        }
    }
}
