use std::collections::HashSet;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AdminUser, AuthUser},
    catalog::{ImageUpload, ReconcileReport},
    errors::{AppError, AppResult},
    models::{
        AdminStats, CreateTitleRequest, CreateUserRequest, Credentials, MIN_PASSWORD_LEN,
        PasswordResetRequest, SetAdminRequest, Taxonomy, TaxonomyEntry, TaxonomyNameRequest,
        Title, UpdatePasswordRequest, UpdateTitleRequest, User, UserSummary,
        VerifyResetCodeRequest,
    },
    session::{SessionSnapshot, is_bootstrap_admin},
    view::TitleQuery,
};

// --- Input Validation ---

fn validate_email(email: &str) -> AppResult<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".into()));
    }
    Ok(email.to_string())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_taxonomy_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".into()));
    }
    Ok(name.to_string())
}

/// read_title_form
///
/// Reads a `multipart/form-data` title form: a JSON `title` part and an optional `image`
/// file part. An empty file part, as browsers send when no file was picked, counts as absent.
async fn read_title_form<T: DeserializeOwned>(
    mut multipart: Multipart,
) -> AppResult<(T, Option<ImageUpload>)> {
    let mut title = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        match field.name() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                let parsed = serde_json::from_str::<T>(&text)
                    .map_err(|e| AppError::Validation(format!("invalid title: {}", e)))?;
                title = Some(parsed);
            }
            Some("image") => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                if !bytes.is_empty() {
                    image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| AppError::Validation("missing 'title' part".into()))?;
    Ok((title, image))
}

// --- Session & Account Handlers ---

/// get_session
///
/// [Public Route] The application's current session state.
#[utoipa::path(
    get,
    path = "/api/session",
    responses((status = 200, description = "Session state", body = SessionSnapshot))
)]
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

/// sign_up
///
/// [Public Route] Registers an account with the auth backend. Does not sign in unless the
/// backend starts a session on its own.
#[utoipa::path(
    post,
    path = "/api/auth/sign-up",
    request_body = Credentials,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid email or password")
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> AppResult<(StatusCode, Json<User>)> {
    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let user = state.session.sign_up(&email, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// sign_in
#[utoipa::path(
    post,
    path = "/api/auth/sign-in",
    request_body = Credentials,
    responses(
        (status = 200, description = "Signed in", body = SessionSnapshot),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> AppResult<Json<SessionSnapshot>> {
    let email = validate_email(&payload.email)?;
    if payload.password.is_empty() {
        return Err(AppError::Validation("password is required".into()));
    }

    let snapshot = state.session.sign_in(&email, &payload.password).await?;
    Ok(Json(snapshot))
}

/// sign_out
///
/// [Public Route] Always clears the local session. Succeeds when the backend had no session.
#[utoipa::path(
    post,
    path = "/api/auth/sign-out",
    responses((status = 204, description = "Signed out"))
)]
pub async fn sign_out(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.session.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// request_password_reset
///
/// [Public Route] Emails a recovery code. Unknown addresses are not disclosed.
#[utoipa::path(
    post,
    path = "/api/auth/password-reset",
    request_body = PasswordResetRequest,
    responses((status = 202, description = "Recovery email requested"))
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> AppResult<StatusCode> {
    let email = validate_email(&payload.email)?;
    state.session.request_password_reset(&email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// verify_reset_code
///
/// [Public Route] Exchanges a recovery code for a session, after which the password can be
/// changed through `PUT /api/auth/password`.
#[utoipa::path(
    post,
    path = "/api/auth/verify-reset-code",
    request_body = VerifyResetCodeRequest,
    responses(
        (status = 200, description = "Code accepted, signed in", body = SessionSnapshot),
        (status = 400, description = "Invalid or expired code")
    )
)]
pub async fn verify_reset_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyResetCodeRequest>,
) -> AppResult<Json<SessionSnapshot>> {
    let email = validate_email(&payload.email)?;
    let code = payload.code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("code is required".into()));
    }

    let snapshot = state.session.verify_reset_code(&email, code).await?;
    Ok(Json(snapshot))
}

/// update_password
#[utoipa::path(
    put,
    path = "/api/auth/password",
    request_body = UpdatePasswordRequest,
    responses((status = 204, description = "Password changed"))
)]
pub async fn update_password(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> AppResult<StatusCode> {
    validate_password(&payload.password)?;
    state.session.update_password(&payload.password).await?;
    info!(user_id = %id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

// --- Title Handlers ---

/// list_titles
///
/// [Authenticated Route] The user's active titles, filtered and sorted by the query string.
/// Titles in the watchlist category only appear when that category is requested.
#[utoipa::path(
    get,
    path = "/api/titles",
    params(TitleQuery),
    responses((status = 200, description = "Titles", body = [Title]))
)]
pub async fn list_titles(
    _user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TitleQuery>,
) -> AppResult<Json<Vec<Title>>> {
    Ok(Json(state.catalog.browse(&query).await?))
}

/// create_title
///
/// [Authenticated Route] `multipart/form-data`: a JSON `title` part (`CreateTitleRequest`)
/// and an optional `image` file. The uploaded poster's URL is stored as `image`.
#[utoipa::path(
    post,
    path = "/api/titles",
    request_body(content = CreateTitleRequest, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Created", body = Title),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn create_title(
    _user: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Title>)> {
    let (request, image) = read_title_form::<CreateTitleRequest>(multipart).await?;
    let title = state.catalog.add(request, image).await?;
    Ok((StatusCode::CREATED, Json(title)))
}

/// get_title
#[utoipa::path(
    get,
    path = "/api/titles/{id}",
    responses(
        (status = 200, description = "Title", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_title(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Title>> {
    Ok(Json(state.catalog.get(id).await?))
}

/// update_title
///
/// [Authenticated Route] Same form as `create_title`, with an `UpdateTitleRequest` part.
/// Only the fields present are changed.
#[utoipa::path(
    put,
    path = "/api/titles/{id}",
    request_body(content = UpdateTitleRequest, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Updated", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_title(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<Title>> {
    let (changes, image) = read_title_form::<UpdateTitleRequest>(multipart).await?;
    Ok(Json(state.catalog.update(id, changes, image).await?))
}

/// trash_title
#[utoipa::path(
    post,
    path = "/api/titles/{id}/trash",
    responses(
        (status = 200, description = "Moved to trash", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn trash_title(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Title>> {
    Ok(Json(state.catalog.soft_delete(id).await?))
}

/// restore_title
#[utoipa::path(
    post,
    path = "/api/titles/{id}/restore",
    responses(
        (status = 200, description = "Restored", body = Title),
        (status = 404, description = "Not Found")
    )
)]
pub async fn restore_title(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Title>> {
    Ok(Json(state.catalog.restore(id).await?))
}

/// delete_title
///
/// [Authenticated Route] Permanent removal.
#[utoipa::path(
    delete,
    path = "/api/titles/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_title(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.catalog.hard_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// list_trash
#[utoipa::path(
    get,
    path = "/api/trash",
    responses((status = 200, description = "Trashed titles", body = [Title]))
)]
pub async fn list_trash(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Title>>> {
    Ok(Json(state.catalog.trash().await?))
}

/// reconcile_titles
///
/// [Authenticated Route] Runs category reconciliation for the user's titles on demand.
#[utoipa::path(
    post,
    path = "/api/titles/reconcile",
    responses((status = 200, description = "Reconciled", body = ReconcileReport))
)]
pub async fn reconcile_titles(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<ReconcileReport>> {
    Ok(Json(state.catalog.reconcile_categories().await?))
}

/// list_categories
#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Categories by name", body = [TaxonomyEntry]))
)]
pub async fn list_categories(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TaxonomyEntry>>> {
    Ok(Json(state.repo.list_entries(Taxonomy::Categories).await?))
}

/// list_types
#[utoipa::path(
    get,
    path = "/api/types",
    responses((status = 200, description = "Types by name", body = [TaxonomyEntry]))
)]
pub async fn list_types(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TaxonomyEntry>>> {
    Ok(Json(state.repo.list_entries(Taxonomy::Types).await?))
}

// --- Admin Handlers ---

/// get_admin_stats
///
/// [Admin Route] Dashboard counts. Titles in the trash are not counted.
#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "Stats", body = AdminStats),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn get_admin_stats(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> AppResult<Json<AdminStats>> {
    Ok(Json(admin_stats(&state).await?))
}

pub(crate) async fn admin_stats(state: &AppState) -> AppResult<AdminStats> {
    let mut stats = state.repo.get_stats().await?;
    // The dashboard stays usable when the auth admin API is not configured.
    match state.auth.list_users().await {
        Ok(users) => stats.total_users = users.len() as i64,
        Err(e) => warn!(error = %e, "user count unavailable"),
    }
    Ok(stats)
}

/// list_taxonomy
///
/// [Admin Route] `taxonomy` is `categories` or `types`.
#[utoipa::path(
    get,
    path = "/api/admin/{taxonomy}",
    params(("taxonomy" = Taxonomy, Path, description = "categories or types")),
    responses((status = 200, description = "Entries by name", body = [TaxonomyEntry]))
)]
pub async fn list_taxonomy(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(taxonomy): Path<Taxonomy>,
) -> AppResult<Json<Vec<TaxonomyEntry>>> {
    Ok(Json(state.repo.list_entries(taxonomy).await?))
}

/// create_taxonomy_entry
#[utoipa::path(
    post,
    path = "/api/admin/{taxonomy}",
    params(("taxonomy" = Taxonomy, Path, description = "categories or types")),
    request_body = TaxonomyNameRequest,
    responses(
        (status = 201, description = "Created", body = TaxonomyEntry),
        (status = 409, description = "Name already exists")
    )
)]
pub async fn create_taxonomy_entry(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(taxonomy): Path<Taxonomy>,
    Json(payload): Json<TaxonomyNameRequest>,
) -> AppResult<(StatusCode, Json<TaxonomyEntry>)> {
    let name = validate_taxonomy_name(&payload.name)?;
    let entry = state.repo.create_entry(taxonomy, &name).await?;
    info!(admin_id = %admin.id, taxonomy = taxonomy.table(), name = %entry.name, "entry created");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// rename_taxonomy_entry
///
/// [Admin Route] Renaming a category carries its titles over to the new name.
#[utoipa::path(
    put,
    path = "/api/admin/{taxonomy}/{id}",
    params(
        ("taxonomy" = Taxonomy, Path, description = "categories or types"),
        ("id" = Uuid, Path, description = "Entry id")
    ),
    request_body = TaxonomyNameRequest,
    responses(
        (status = 200, description = "Renamed", body = TaxonomyEntry),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Name already exists")
    )
)]
pub async fn rename_taxonomy_entry(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path((taxonomy, id)): Path<(Taxonomy, Uuid)>,
    Json(payload): Json<TaxonomyNameRequest>,
) -> AppResult<Json<TaxonomyEntry>> {
    let name = validate_taxonomy_name(&payload.name)?;
    let entry = state
        .repo
        .rename_entry(taxonomy, id, &name)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(admin_id = %admin.id, taxonomy = taxonomy.table(), name = %entry.name, "entry renamed");
    Ok(Json(entry))
}

/// delete_taxonomy_entry
///
/// [Admin Route] Titles left on a deleted category are moved by reconciliation.
#[utoipa::path(
    delete,
    path = "/api/admin/{taxonomy}/{id}",
    params(
        ("taxonomy" = Taxonomy, Path, description = "categories or types"),
        ("id" = Uuid, Path, description = "Entry id")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_taxonomy_entry(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path((taxonomy, id)): Path<(Taxonomy, Uuid)>,
) -> AppResult<StatusCode> {
    if !state.repo.delete_entry(taxonomy, id).await? {
        return Err(AppError::NotFound);
    }
    info!(admin_id = %admin.id, taxonomy = taxonomy.table(), entry_id = %id, "entry deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// list_users
///
/// [Admin Route] Every account known to the auth backend with its admin status.
#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses((status = 200, description = "Users", body = [UserSummary]))
)]
pub async fn list_users(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(user_summaries(&state).await?))
}

pub(crate) async fn user_summaries(state: &AppState) -> AppResult<Vec<UserSummary>> {
    let users = state.auth.list_users().await?;
    let admins: HashSet<Uuid> = state.repo.admin_user_ids().await?.into_iter().collect();

    Ok(users
        .into_iter()
        .map(|user| summarize(user, &admins))
        .collect())
}

fn summarize(user: User, admins: &HashSet<Uuid>) -> UserSummary {
    let bootstrap_admin = is_bootstrap_admin(&user.email);
    UserSummary {
        is_admin: bootstrap_admin || admins.contains(&user.id),
        bootstrap_admin,
        id: user.id,
        email: user.email,
    }
}

/// create_user
///
/// [Admin Route] Creates a confirmed account, optionally granting admin rights.
#[utoipa::path(
    post,
    path = "/api/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserSummary),
        (status = 400, description = "Invalid email or password")
    )
)]
pub async fn create_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserSummary>)> {
    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let user = state.auth.create_user(&email, &payload.password).await?;
    let mut admins = HashSet::new();
    if payload.is_admin && !is_bootstrap_admin(&user.email) {
        state.repo.set_admin_role(user.id, true).await?;
        admins.insert(user.id);
    }

    info!(admin_id = %admin.id, user_id = %user.id, is_admin = payload.is_admin, "user created");
    Ok((StatusCode::CREATED, Json(summarize(user, &admins))))
}

/// set_user_admin
///
/// [Admin Route] Grants or revokes admin rights. Bootstrap admins cannot be revoked.
#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/admin",
    request_body = SetAdminRequest,
    responses(
        (status = 200, description = "Updated", body = UserSummary),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Bootstrap admin")
    )
)]
pub async fn set_user_admin(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetAdminRequest>,
) -> AppResult<Json<UserSummary>> {
    let user = state
        .auth
        .list_users()
        .await?
        .into_iter()
        .find(|u| u.id == id)
        .ok_or(AppError::NotFound)?;

    if !payload.is_admin && is_bootstrap_admin(&user.email) {
        return Err(AppError::Conflict(format!(
            "{} is an admin by email and cannot be revoked",
            user.email
        )));
    }

    state.repo.set_admin_role(id, payload.is_admin).await?;
    // The change may concern the signed-in user.
    state.session.refresh_admin_status().await;

    info!(admin_id = %admin.id, user_id = %id, is_admin = payload.is_admin, "admin role changed");
    let admins: HashSet<Uuid> = state.repo.admin_user_ids().await?.into_iter().collect();
    Ok(Json(summarize(user, &admins)))
}
