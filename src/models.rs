use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Identity ---

/// User
///
/// Backend-issued identity. The email is also the bootstrap admin marker (see `session::derive_admin`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

/// AuthSession
///
/// A live session issued by the auth backend. Never serialized to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which the access token is rejected.
    pub expires_at: i64,
    pub user: User,
}

// --- Catalog ---

/// TitleType
///
/// The closed set of media kinds a title can have. Stored as the Postgres enum `title_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "title_type", rename_all = "lowercase")]
#[ts(export)]
pub enum TitleType {
    #[default]
    Movie,
    Series,
    Soap,
}

impl TitleType {
    pub const ALL: [TitleType; 3] = [TitleType::Movie, TitleType::Series, TitleType::Soap];

    pub fn as_str(&self) -> &'static str {
        match self {
            TitleType::Movie => "movie",
            TitleType::Series => "series",
            TitleType::Soap => "soap",
        }
    }
}

impl fmt::Display for TitleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title
///
/// A catalog entry from the `titles` table, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Title {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,

    // 'type' is a reserved keyword in Rust.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub title_type: TitleType,

    /// Free text, expected to match a managed category name.
    pub category: String,
    pub rating: f64,
    /// Public poster URL.
    pub image: Option<String>,
    pub deleted: bool,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// CreateTitleRequest
///
/// Sent as the JSON `title` part of the multipart create form. When an image file part
/// accompanies it, the uploaded file's URL replaces `image`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateTitleRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub title_type: TitleType,
    pub category: String,
    pub rating: f64,
    #[serde(default)]
    pub image: Option<String>,
}

/// UpdateTitleRequest
///
/// Partial update. Only `Some` fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(default)]
#[ts(export)]
pub struct UpdateTitleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub title_type: Option<TitleType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl UpdateTitleRequest {
    /// A change that only moves the title to another category.
    pub fn category(name: impl Into<String>) -> Self {
        Self {
            category: Some(name.into()),
            ..Self::default()
        }
    }
}

// --- Taxonomies ---

/// Taxonomy
///
/// The two admin-managed name lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Taxonomy {
    Categories,
    Types,
}

impl Taxonomy {
    pub fn table(&self) -> &'static str {
        match self {
            Taxonomy::Categories => "categories",
            Taxonomy::Types => "types",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "categories" => Some(Taxonomy::Categories),
            "types" => Some(Taxonomy::Types),
            _ => None,
        }
    }
}

/// TaxonomyEntry
///
/// A row of the `categories` or `types` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct TaxonomyEntry {
    pub id: Uuid,
    pub name: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// TaxonomyChange
///
/// One event on the taxonomy change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaxonomyChange {
    Inserted { taxonomy: Taxonomy, name: String },
    Renamed { taxonomy: Taxonomy, from: String, to: String },
    Deleted { taxonomy: Taxonomy, name: String },
}

impl TaxonomyChange {
    pub fn taxonomy(&self) -> Taxonomy {
        match self {
            TaxonomyChange::Inserted { taxonomy, .. }
            | TaxonomyChange::Renamed { taxonomy, .. }
            | TaxonomyChange::Deleted { taxonomy, .. } => *taxonomy,
        }
    }
}

// --- Request Payloads ---

/// Shortest password accepted by sign-up, password change, and admin user creation.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Credentials
///
/// Used by sign-up and sign-in. The password is forwarded to the auth backend and never logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VerifyResetCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// TaxonomyNameRequest
///
/// Create or rename a category / type.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TaxonomyNameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

// --- Dashboard Schemas (Output) ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct NamedCount {
    pub name: String,
    pub count: i64,
}

/// AdminStats
///
/// Output of GET /api/admin/stats. Title counts exclude soft-deleted titles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminStats {
    pub total_titles: i64,
    pub total_categories: i64,
    pub total_types: i64,
    pub titles_per_category: Vec<NamedCount>,
    pub titles_per_type: Vec<NamedCount>,
    pub total_users: i64,
}

/// UserSummary
///
/// One row of the admin user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
    /// Admin through the email suffix; cannot be revoked.
    pub bootstrap_admin: bool,
}
