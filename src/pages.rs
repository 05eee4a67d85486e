//! Guarded pages. Each handler asks `guards::authorize` first and only builds its view
//! model once the decision is `Authorized`.

use axum::extract::{Path, Query, State};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    AppState,
    errors::AppResult,
    guards::{Page, Route, RouteAccess, authorize},
    handlers,
    models::{AdminStats, MIN_PASSWORD_LEN, Taxonomy, TaxonomyEntry, Title, User, UserSummary},
    view::TitleQuery,
};

#[derive(Debug, Serialize)]
pub struct LandingView {
    pub page: &'static str,
    pub login_path: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LoginView {
    pub page: &'static str,
    pub min_password_len: usize,
}

#[derive(Debug, Serialize)]
pub struct CatalogView {
    pub page: &'static str,
    pub user: User,
    pub is_admin: bool,
    /// Link to the admin panel, for admins only.
    pub admin_path: Option<&'static str>,
    pub query: TitleQuery,
    pub titles: Vec<Title>,
    pub categories: Vec<String>,
    pub types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TrashView {
    pub page: &'static str,
    pub titles: Vec<Title>,
}

#[derive(Debug, Serialize)]
pub struct EditTitleView {
    pub page: &'static str,
    pub title: Title,
    pub categories: Vec<String>,
    pub types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminView {
    pub page: &'static str,
    pub stats: AdminStats,
    pub categories: Vec<TaxonomyEntry>,
    pub types: Vec<TaxonomyEntry>,
    pub users: Vec<UserSummary>,
}

async fn names(state: &AppState, taxonomy: Taxonomy) -> AppResult<Vec<String>> {
    Ok(state
        .repo
        .list_entries(taxonomy)
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect())
}

/// GET /
pub async fn landing(State(state): State<AppState>) -> Page<LandingView> {
    let decision = authorize(RouteAccess::PublicOnly, &state.session.snapshot());
    Page::unless_authorized(decision).unwrap_or(Page::Render(LandingView {
        page: "landing",
        login_path: Route::Login.path(),
    }))
}

/// GET /login
pub async fn login(State(state): State<AppState>) -> Page<LoginView> {
    let decision = authorize(RouteAccess::PublicOnly, &state.session.snapshot());
    Page::unless_authorized(decision).unwrap_or(Page::Render(LoginView {
        page: "login",
        min_password_len: MIN_PASSWORD_LEN,
    }))
}

/// GET /catalog
pub async fn catalog(
    State(state): State<AppState>,
    Query(query): Query<TitleQuery>,
) -> AppResult<Page<CatalogView>> {
    let snapshot = state.session.snapshot();
    if let Some(page) = Page::unless_authorized(authorize(RouteAccess::Authenticated, &snapshot)) {
        return Ok(page);
    }
    // Authorized implies a resolved session with a user.
    let Some(user) = snapshot.user else {
        return Ok(Page::Redirect(Route::Landing));
    };

    let titles = state.catalog.browse(&query).await?;
    Ok(Page::Render(CatalogView {
        page: "catalog",
        admin_path: snapshot.is_admin.then(|| Route::Admin.path()),
        is_admin: snapshot.is_admin,
        user,
        query,
        titles,
        categories: names(&state, Taxonomy::Categories).await?,
        types: names(&state, Taxonomy::Types).await?,
    }))
}

/// GET /trash
pub async fn trash(State(state): State<AppState>) -> AppResult<Page<TrashView>> {
    let decision = authorize(RouteAccess::Authenticated, &state.session.snapshot());
    if let Some(page) = Page::unless_authorized(decision) {
        return Ok(page);
    }

    Ok(Page::Render(TrashView {
        page: "trash",
        titles: state.catalog.trash().await?,
    }))
}

/// GET /titles/{id}/edit
pub async fn edit_title(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Page<EditTitleView>> {
    let decision = authorize(RouteAccess::Authenticated, &state.session.snapshot());
    if let Some(page) = Page::unless_authorized(decision) {
        return Ok(page);
    }

    Ok(Page::Render(EditTitleView {
        page: "edit_title",
        title: state.catalog.get(id).await?,
        categories: names(&state, Taxonomy::Categories).await?,
        types: names(&state, Taxonomy::Types).await?,
    }))
}

/// GET /admin
pub async fn admin(State(state): State<AppState>) -> AppResult<Page<AdminView>> {
    let decision = authorize(RouteAccess::AdminOnly, &state.session.snapshot());
    if let Some(page) = Page::unless_authorized(decision) {
        return Ok(page);
    }

    // The user list needs the auth admin API; the panel still renders without it.
    let users = match handlers::user_summaries(&state).await {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(error = %e, "user list unavailable");
            Vec::new()
        }
    };

    Ok(Page::Render(AdminView {
        page: "admin",
        stats: handlers::admin_stats(&state).await?,
        categories: state.repo.list_entries(Taxonomy::Categories).await?,
        types: state.repo.list_entries(Taxonomy::Types).await?,
        users,
    }))
}
