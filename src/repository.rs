use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgListener};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    errors::{RepoResult, RepositoryError},
    listener::ListenerHandle,
    models::{
        AdminStats, CreateTitleRequest, NamedCount, Taxonomy, TaxonomyChange, TaxonomyEntry,
        Title, UpdateTitleRequest,
    },
};

/// Postgres channel the taxonomy triggers notify on.
pub const TAXONOMY_CHANNEL: &str = "taxonomy_changes";

/// Visibility
///
/// The soft-delete predicate. Every title listing goes through exactly one of these, so no
/// consumer re-checks the `deleted` flag on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Not soft-deleted.
    Active,
    /// In the trash.
    Trashed,
    All,
}

impl Visibility {
    pub fn matches(&self, deleted: bool) -> bool {
        match self {
            Visibility::Active => !deleted,
            Visibility::Trashed => deleted,
            Visibility::All => true,
        }
    }

    fn sql_clause(&self) -> &'static str {
        match self {
            Visibility::Active => " AND deleted = false",
            Visibility::Trashed => " AND deleted = true",
            Visibility::All => "",
        }
    }
}

/// Repository Trait
///
/// The data half of the backend-as-a-service. Every title operation is scoped by owner, so a
/// user can never read or write another user's rows through it.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Titles (Owner-Scoped) ---
    async fn list_titles(&self, owner_id: Uuid, visibility: Visibility) -> RepoResult<Vec<Title>>;
    async fn get_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<Option<Title>>;
    async fn insert_title(&self, owner_id: Uuid, title: CreateTitleRequest) -> RepoResult<Title>;
    /// Returns `None` when no row matched both id and owner.
    async fn update_title(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: UpdateTitleRequest,
    ) -> RepoResult<Option<Title>>;
    async fn set_title_deleted(
        &self,
        id: Uuid,
        owner_id: Uuid,
        deleted: bool,
    ) -> RepoResult<Option<Title>>;
    /// Irreversible. Returns false when no row matched.
    async fn delete_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<bool>;

    // --- Taxonomies (Admin-Managed) ---
    /// Ordered by name, bytewise.
    async fn list_entries(&self, taxonomy: Taxonomy) -> RepoResult<Vec<TaxonomyEntry>>;
    async fn create_entry(&self, taxonomy: Taxonomy, name: &str) -> RepoResult<TaxonomyEntry>;
    async fn rename_entry(
        &self,
        taxonomy: Taxonomy,
        id: Uuid,
        name: &str,
    ) -> RepoResult<Option<TaxonomyEntry>>;
    async fn delete_entry(&self, taxonomy: Taxonomy, id: Uuid) -> RepoResult<bool>;
    /// The taxonomy change feed. Drop the receiver to unsubscribe.
    fn subscribe_taxonomy_changes(&self) -> broadcast::Receiver<TaxonomyChange>;

    // --- Roles ---
    async fn has_admin_role(&self, user_id: Uuid) -> RepoResult<bool>;
    async fn set_admin_role(&self, user_id: Uuid, is_admin: bool) -> RepoResult<()>;
    async fn admin_user_ids(&self) -> RepoResult<Vec<Uuid>>;

    // --- Dashboard ---
    /// Everything but `total_users`, which only the auth backend knows.
    async fn get_stats(&self) -> RepoResult<AdminStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// NotifyPayload
///
/// JSON body of a `taxonomy_changes` notification, as built by the trigger in `migrations/`.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    table: String,
    op: String,
    old_name: Option<String>,
    new_name: Option<String>,
}

/// parse_taxonomy_notification
///
/// Maps a trigger notification to a change event. Updates that keep the name are ignored.
pub fn parse_taxonomy_notification(payload: &str) -> Option<TaxonomyChange> {
    let payload: NotifyPayload = serde_json::from_str(payload).ok()?;
    let taxonomy = Taxonomy::from_table(&payload.table)?;

    match payload.op.as_str() {
        "INSERT" => Some(TaxonomyChange::Inserted {
            taxonomy,
            name: payload.new_name?,
        }),
        "UPDATE" => {
            let from = payload.old_name?;
            let to = payload.new_name?;
            (from != to).then_some(TaxonomyChange::Renamed { taxonomy, from, to })
        }
        "DELETE" => Some(TaxonomyChange::Deleted {
            taxonomy,
            name: payload.old_name?,
        }),
        _ => None,
    }
}

const TITLE_COLUMNS: &str =
    "id, owner_id, name, type, category, rating, image, deleted, created_at, updated_at";

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the BaaS Postgres database.
pub struct PostgresRepository {
    pool: PgPool,
    changes: broadcast::Sender<TaxonomyChange>,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { pool, changes }
    }

    /// spawn_change_listener
    ///
    /// Forwards `taxonomy_changes` notifications into the change feed. The task ends when the
    /// repository is dropped or the handle is stopped.
    pub async fn spawn_change_listener(self: &Arc<Self>) -> Result<ListenerHandle, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(TAXONOMY_CHANNEL).await?;

        let repo: Weak<Self> = Arc::downgrade(self);
        Ok(ListenerHandle::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!("taxonomy listener error: {:?}", e);
                        break;
                    }
                };
                let Some(repo) = repo.upgrade() else {
                    break;
                };
                match parse_taxonomy_notification(notification.payload()) {
                    Some(change) => {
                        tracing::debug!(?change, "taxonomy change");
                        let _ = repo.changes.send(change);
                    }
                    None => tracing::warn!(
                        payload = notification.payload(),
                        "ignoring unrecognised taxonomy notification"
                    ),
                }
            }
        }))
    }

    fn check_unique(err: sqlx::Error, name: &str) -> RepositoryError {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("'{}' already exists", name))
            }
            _ => RepositoryError::Database(err),
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_titles
    ///
    /// Newest first. The visibility predicate is appended to the owner filter.
    async fn list_titles(&self, owner_id: Uuid, visibility: Visibility) -> RepoResult<Vec<Title>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TITLE_COLUMNS} FROM titles WHERE owner_id = "));
        builder.push_bind(owner_id);
        builder.push(visibility.sql_clause());
        builder.push(" ORDER BY created_at DESC");

        let titles = builder
            .build_query_as::<Title>()
            .fetch_all(&self.pool)
            .await?;
        Ok(titles)
    }

    async fn get_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<Option<Title>> {
        let title = sqlx::query_as::<_, Title>(&format!(
            "SELECT {TITLE_COLUMNS} FROM titles WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(title)
    }

    async fn insert_title(&self, owner_id: Uuid, title: CreateTitleRequest) -> RepoResult<Title> {
        let created = sqlx::query_as::<_, Title>(&format!(
            r#"INSERT INTO titles (id, owner_id, name, type, category, rating, image, deleted, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW(), NOW())
               RETURNING {TITLE_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(title.name)
        .bind(title.title_type)
        .bind(title.category)
        .bind(title.rating)
        .bind(title.image)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    /// update_title
    ///
    /// COALESCE keeps every column whose field is `None`.
    async fn update_title(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: UpdateTitleRequest,
    ) -> RepoResult<Option<Title>> {
        let updated = sqlx::query_as::<_, Title>(&format!(
            r#"UPDATE titles
               SET name = COALESCE($3, name),
                   type = COALESCE($4, type),
                   category = COALESCE($5, category),
                   rating = COALESCE($6, rating),
                   image = COALESCE($7, image),
                   updated_at = NOW()
               WHERE id = $1 AND owner_id = $2
               RETURNING {TITLE_COLUMNS}"#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(changes.name)
        .bind(changes.title_type)
        .bind(changes.category)
        .bind(changes.rating)
        .bind(changes.image)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn set_title_deleted(
        &self,
        id: Uuid,
        owner_id: Uuid,
        deleted: bool,
    ) -> RepoResult<Option<Title>> {
        let updated = sqlx::query_as::<_, Title>(&format!(
            r#"UPDATE titles SET deleted = $3, updated_at = NOW()
               WHERE id = $1 AND owner_id = $2
               RETURNING {TITLE_COLUMNS}"#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(deleted)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM titles WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_entries(&self, taxonomy: Taxonomy) -> RepoResult<Vec<TaxonomyEntry>> {
        let entries = sqlx::query_as::<_, TaxonomyEntry>(&format!(
            "SELECT id, name, created_at, updated_at FROM {} ORDER BY name COLLATE \"C\" ASC",
            taxonomy.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn create_entry(&self, taxonomy: Taxonomy, name: &str) -> RepoResult<TaxonomyEntry> {
        sqlx::query_as::<_, TaxonomyEntry>(&format!(
            r#"INSERT INTO {} (id, name, created_at, updated_at) VALUES ($1, $2, NOW(), NOW())
               RETURNING id, name, created_at, updated_at"#,
            taxonomy.table()
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::check_unique(e, name))
    }

    async fn rename_entry(
        &self,
        taxonomy: Taxonomy,
        id: Uuid,
        name: &str,
    ) -> RepoResult<Option<TaxonomyEntry>> {
        sqlx::query_as::<_, TaxonomyEntry>(&format!(
            r#"UPDATE {} SET name = $2, updated_at = NOW() WHERE id = $1
               RETURNING id, name, created_at, updated_at"#,
            taxonomy.table()
        ))
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::check_unique(e, name))
    }

    async fn delete_entry(&self, taxonomy: Taxonomy, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", taxonomy.table()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn subscribe_taxonomy_changes(&self) -> broadcast::Receiver<TaxonomyChange> {
        self.changes.subscribe()
    }

    async fn has_admin_role(&self, user_id: Uuid) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_roles WHERE user_id = $1 AND role = 'admin')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// set_admin_role
    ///
    /// Idempotent in both directions.
    async fn set_admin_role(&self, user_id: Uuid, is_admin: bool) -> RepoResult<()> {
        let query = if is_admin {
            "INSERT INTO user_roles (user_id, role) VALUES ($1, 'admin') ON CONFLICT DO NOTHING"
        } else {
            "DELETE FROM user_roles WHERE user_id = $1 AND role = 'admin'"
        };
        sqlx::query(query).bind(user_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn admin_user_ids(&self) -> RepoResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM user_roles WHERE role = 'admin'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn get_stats(&self) -> RepoResult<AdminStats> {
        let total_titles =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM titles WHERE deleted = false")
                .fetch_one(&self.pool)
                .await?;
        let total_categories = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;
        let total_types = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM types")
            .fetch_one(&self.pool)
            .await?;

        let titles_per_category = sqlx::query_as::<_, NamedCount>(
            r#"SELECT c.name, COUNT(t.id) AS count
               FROM categories c
               LEFT JOIN titles t ON t.category = c.name AND t.deleted = false
               GROUP BY c.name ORDER BY c.name COLLATE "C""#,
        )
        .fetch_all(&self.pool)
        .await?;

        let titles_per_type = sqlx::query_as::<_, NamedCount>(
            r#"SELECT ty.name, COUNT(t.id) AS count
               FROM types ty
               LEFT JOIN titles t ON t.type::text = ty.name AND t.deleted = false
               GROUP BY ty.name ORDER BY ty.name COLLATE "C""#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(AdminStats {
            total_titles,
            total_categories,
            total_types,
            titles_per_category,
            titles_per_type,
            total_users: 0,
        })
    }
}
