//! The signed-in user's titles: CRUD, trash, and category reconciliation.

use std::{
    collections::HashSet,
    ops::RangeInclusive,
    sync::{Arc, Weak},
};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::CatalogError,
    listener::ListenerHandle,
    models::{
        CreateTitleRequest, Taxonomy, TaxonomyChange, Title, UpdateTitleRequest, User,
    },
    repository::{RepositoryState, Visibility},
    session::{SessionSnapshot, SessionStore},
    storage::{StorageState, object_key_for},
    view::{TitleQuery, WATCHLIST_CATEGORY, apply_query},
};

/// Category assigned when no managed category exists to fall back to.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Takes category names in listing order. Titles moved to the watchlist would drop out of
/// the default catalog, so it is only picked when nothing else is managed.
fn pick_fallback<'a>(names: impl Iterator<Item = &'a str> + Clone) -> String {
    names
        .clone()
        .find(|name| *name != WATCHLIST_CATEGORY)
        .or_else(|| names.clone().next())
        .unwrap_or(UNCATEGORIZED)
        .to_string()
}

/// Accepted rating values, inclusive.
pub const RATING_RANGE: RangeInclusive<f64> = 0.0..=10.0;

/// ImageUpload
///
/// A poster file received with a create or update request.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// ReconcileReport
///
/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ReconcileReport {
    /// Titles inspected, trashed ones included.
    pub checked: usize,
    /// Titles whose category was rewritten.
    pub reassigned: usize,
    /// Category stale titles were moved to.
    pub fallback: String,
}

struct CatalogInner {
    repo: RepositoryState,
    storage: StorageState,
    session: SessionStore,
}

/// CatalogStore
///
/// Every operation acts on the titles of `session.current_user()` and fails with
/// `CatalogError::AuthRequired` when nobody is signed in. Input is validated before any
/// backend call.
#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<CatalogInner>,
}

impl CatalogStore {
    pub fn new(repo: RepositoryState, storage: StorageState, session: SessionStore) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                repo,
                storage,
                session,
            }),
        }
    }

    // --- Reads ---

    pub async fn get(&self, id: Uuid) -> Result<Title, CatalogError> {
        let user = self.require_user()?;
        self.inner
            .repo
            .get_title(id, user.id)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    pub async fn list(&self, visibility: Visibility) -> Result<Vec<Title>, CatalogError> {
        let user = self.require_user()?;
        Ok(self.inner.repo.list_titles(user.id, visibility).await?)
    }

    /// Active titles through the catalog view filters.
    pub async fn browse(&self, query: &TitleQuery) -> Result<Vec<Title>, CatalogError> {
        let titles = self.list(Visibility::Active).await?;
        Ok(apply_query(&titles, query))
    }

    pub async fn trash(&self) -> Result<Vec<Title>, CatalogError> {
        self.list(Visibility::Trashed).await
    }

    // --- Writes ---

    /// add
    ///
    /// Validates, uploads the poster when one is given (its URL replaces `image`), then
    /// inserts the title for the current user.
    pub async fn add(
        &self,
        mut title: CreateTitleRequest,
        image: Option<ImageUpload>,
    ) -> Result<Title, CatalogError> {
        title.name = required(&title.name, "name")?;
        title.category = required(&title.category, "category")?;
        validate_rating(title.rating)?;
        if let Some(image) = &image {
            validate_image(image)?;
        }

        let user = self.require_user()?;
        if let Some(image) = image {
            title.image = Some(self.upload_image(user.id, image).await?);
        }

        let created = self.inner.repo.insert_title(user.id, title).await?;
        info!(title_id = %created.id, user_id = %user.id, "title added");
        Ok(created)
    }

    /// update
    ///
    /// Writes only the fields present in `changes`. Unknown ids and titles of other users are
    /// both `NotFound`.
    pub async fn update(
        &self,
        id: Uuid,
        mut changes: UpdateTitleRequest,
        image: Option<ImageUpload>,
    ) -> Result<Title, CatalogError> {
        if let Some(name) = &changes.name {
            changes.name = Some(required(name, "name")?);
        }
        if let Some(category) = &changes.category {
            changes.category = Some(required(category, "category")?);
        }
        if let Some(rating) = changes.rating {
            validate_rating(rating)?;
        }
        if let Some(image) = &image {
            validate_image(image)?;
        }

        let user = self.require_user()?;
        if let Some(image) = image {
            // Avoid storing a poster for a title that is not there.
            if self.inner.repo.get_title(id, user.id).await?.is_none() {
                return Err(CatalogError::NotFound(id));
            }
            changes.image = Some(self.upload_image(user.id, image).await?);
        }

        let updated = self
            .inner
            .repo
            .update_title(id, user.id, changes)
            .await?
            .ok_or(CatalogError::NotFound(id))?;
        debug!(title_id = %id, "title updated");
        Ok(updated)
    }

    /// Moves a title to the trash. Nothing but the `deleted` flag changes.
    pub async fn soft_delete(&self, id: Uuid) -> Result<Title, CatalogError> {
        self.set_deleted(id, true).await
    }

    pub async fn restore(&self, id: Uuid) -> Result<Title, CatalogError> {
        self.set_deleted(id, false).await
    }

    /// Removes the title for good, whether trashed or not.
    pub async fn hard_delete(&self, id: Uuid) -> Result<(), CatalogError> {
        let user = self.require_user()?;
        if !self.inner.repo.delete_title(id, user.id).await? {
            return Err(CatalogError::NotFound(id));
        }
        info!(title_id = %id, user_id = %user.id, "title permanently deleted");
        Ok(())
    }

    // --- Category reconciliation ---

    /// Category stale titles move to: the first managed category by name other than the
    /// watchlist, the watchlist when it is the only one, or `UNCATEGORIZED` when there is none.
    pub async fn fallback_category(&self) -> Result<String, CatalogError> {
        let categories = self.inner.repo.list_entries(Taxonomy::Categories).await?;
        Ok(pick_fallback(categories.iter().map(|c| c.name.as_str())))
    }

    /// reconcile_categories
    ///
    /// Moves every title of the current user, trashed ones included, whose category is no
    /// longer managed onto the fallback category.
    pub async fn reconcile_categories(&self) -> Result<ReconcileReport, CatalogError> {
        let user = self.require_user()?;
        let categories = self.inner.repo.list_entries(Taxonomy::Categories).await?;
        let known: HashSet<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        let fallback = pick_fallback(categories.iter().map(|c| c.name.as_str()));

        let titles = self.inner.repo.list_titles(user.id, Visibility::All).await?;
        let mut report = ReconcileReport {
            checked: titles.len(),
            reassigned: 0,
            fallback: fallback.clone(),
        };

        for title in titles {
            // With no categories left, titles already on the sentinel stay put.
            if known.contains(title.category.as_str()) || title.category == fallback {
                continue;
            }
            self.inner
                .repo
                .update_title(title.id, user.id, UpdateTitleRequest::category(&fallback))
                .await?;
            debug!(title_id = %title.id, from = %title.category, to = %fallback, "category reassigned");
            report.reassigned += 1;
        }

        if report.reassigned > 0 {
            info!(
                reassigned = report.reassigned,
                fallback = %report.fallback,
                "stale categories reconciled"
            );
        }
        Ok(report)
    }

    /// apply_category_change
    ///
    /// Reacts to one change of the category list. A rename carries titles over to the new
    /// name before reconciling. Type changes need nothing and return `None`.
    pub async fn apply_category_change(
        &self,
        change: &TaxonomyChange,
    ) -> Result<Option<ReconcileReport>, CatalogError> {
        if change.taxonomy() != Taxonomy::Categories {
            return Ok(None);
        }

        let mut renamed = 0;
        if let TaxonomyChange::Renamed { from, to, .. } = change {
            let user = self.require_user()?;
            let titles = self.inner.repo.list_titles(user.id, Visibility::All).await?;
            for title in titles.into_iter().filter(|t| &t.category == from) {
                self.inner
                    .repo
                    .update_title(title.id, user.id, UpdateTitleRequest::category(to))
                    .await?;
                renamed += 1;
            }
            if renamed > 0 {
                info!(from = %from, to = %to, renamed, "titles followed category rename");
            }
        }

        let mut report = self.reconcile_categories().await?;
        report.reassigned += renamed;
        Ok(Some(report))
    }

    /// spawn_category_listener
    ///
    /// Reconciles once now, then after every category change and every change of signed-in
    /// user. The task ends when the returned handle is dropped or the store is gone.
    pub fn spawn_category_listener(&self) -> ListenerHandle {
        let changes = self.inner.repo.subscribe_taxonomy_changes();
        let session = self.inner.session.subscribe();
        let store = Arc::downgrade(&self.inner);
        ListenerHandle::spawn(follow_category_changes(store, changes, session))
    }

    // --- Internals ---

    fn require_user(&self) -> Result<User, CatalogError> {
        self.inner
            .session
            .current_user()
            .ok_or(CatalogError::AuthRequired)
    }

    async fn set_deleted(&self, id: Uuid, deleted: bool) -> Result<Title, CatalogError> {
        let user = self.require_user()?;
        let title = self
            .inner
            .repo
            .set_title_deleted(id, user.id, deleted)
            .await?
            .ok_or(CatalogError::NotFound(id))?;
        info!(title_id = %id, deleted, "title trash state changed");
        Ok(title)
    }

    async fn upload_image(&self, owner_id: Uuid, image: ImageUpload) -> Result<String, CatalogError> {
        let key = object_key_for(owner_id, &image.file_name);
        Ok(self
            .inner
            .storage
            .upload(&key, image.bytes, &image.content_type)
            .await?)
    }

    /// Runs a pass and logs instead of failing; used by the background listener.
    async fn reconcile_in_background(&self, change: Option<&TaxonomyChange>) {
        let result = match change {
            Some(change) => self.apply_category_change(change).await.map(|_| ()),
            None => self.reconcile_categories().await.map(|_| ()),
        };
        match result {
            Ok(()) => {}
            Err(CatalogError::AuthRequired) => debug!("no signed-in user, reconciliation skipped"),
            Err(e) => warn!(error = %e, "category reconciliation failed"),
        }
    }
}

async fn follow_category_changes(
    store: Weak<CatalogInner>,
    mut changes: broadcast::Receiver<TaxonomyChange>,
    mut session: watch::Receiver<SessionSnapshot>,
) {
    let mut current_user = signed_in_user(&mut session);
    if current_user.is_some() {
        let Some(inner) = store.upgrade() else {
            return;
        };
        CatalogStore { inner }.reconcile_in_background(None).await;
    }

    loop {
        tokio::select! {
            received = changes.recv() => {
                let Some(inner) = store.upgrade() else {
                    break;
                };
                let catalog = CatalogStore { inner };
                match received {
                    Ok(change) => catalog.reconcile_in_background(Some(&change)).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "taxonomy changes lagged, reconciling from scratch");
                        catalog.reconcile_in_background(None).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let user = signed_in_user(&mut session);
                if user == current_user {
                    continue;
                }
                current_user = user;
                if current_user.is_none() {
                    continue;
                }
                let Some(inner) = store.upgrade() else {
                    break;
                };
                CatalogStore { inner }.reconcile_in_background(None).await;
            }
        }
    }
    debug!("category listener stopped");
}

fn signed_in_user(session: &mut watch::Receiver<SessionSnapshot>) -> Option<Uuid> {
    let snapshot = session.borrow_and_update();
    if snapshot.loading {
        return None;
    }
    snapshot.user.as_ref().map(|u| u.id)
}

// --- Validation ---

fn required(value: &str, field: &str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn validate_rating(rating: f64) -> Result<(), CatalogError> {
    if !rating.is_finite() || !RATING_RANGE.contains(&rating) {
        return Err(CatalogError::Validation(format!(
            "rating must be between {} and {}",
            RATING_RANGE.start(),
            RATING_RANGE.end()
        )));
    }
    Ok(())
}

fn validate_image(image: &ImageUpload) -> Result<(), CatalogError> {
    if image.bytes.is_empty() {
        return Err(CatalogError::Validation("image file is empty".into()));
    }
    if !image.content_type.starts_with("image/") {
        return Err(CatalogError::Validation(format!(
            "unsupported image type '{}'",
            image.content_type
        )));
    }
    Ok(())
}
