use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::{
    errors::{RepoResult, RepositoryError},
    models::{
        AdminStats, CreateTitleRequest, NamedCount, Taxonomy, TaxonomyChange, TaxonomyEntry,
        Title, TitleType, UpdateTitleRequest,
    },
    repository::{Repository, Visibility},
};

#[derive(Default)]
struct MemoryState {
    titles: Vec<Title>,
    categories: Vec<TaxonomyEntry>,
    types: Vec<TaxonomyEntry>,
    admins: HashSet<Uuid>,
}

impl MemoryState {
    fn entries(&self, taxonomy: Taxonomy) -> &Vec<TaxonomyEntry> {
        match taxonomy {
            Taxonomy::Categories => &self.categories,
            Taxonomy::Types => &self.types,
        }
    }

    fn entries_mut(&mut self, taxonomy: Taxonomy) -> &mut Vec<TaxonomyEntry> {
        match taxonomy {
            Taxonomy::Categories => &mut self.categories,
            Taxonomy::Types => &mut self.types,
        }
    }

    fn owned_title_mut(&mut self, id: Uuid, owner_id: Uuid) -> Option<&mut Title> {
        self.titles
            .iter_mut()
            .find(|t| t.id == id && t.owner_id == owner_id)
    }
}

/// MemoryRepository
///
/// A `Repository` that keeps everything in process. Used by the test suite and by local runs
/// without `DATABASE_URL`. Taxonomy mutations are published on the change feed directly.
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    changes: broadcast::Sender<TaxonomyChange>,
    role_lookups: AtomicUsize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(MemoryState::default()),
            changes,
            role_lookups: AtomicUsize::new(0),
        }
    }

    /// Seeds categories and the three built-in types, as a fresh database would have.
    pub fn seeded(categories: &[&str]) -> Self {
        let now = Utc::now();
        let entry = |name: &str| TaxonomyEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut state = MemoryState::default();
        state.categories = categories.iter().map(|name| entry(name)).collect();
        state.categories.sort_by(|a, b| a.name.cmp(&b.name));
        state.types = TitleType::ALL.iter().map(|t| entry(t.as_str())).collect();
        state.types.sort_by(|a, b| a.name.cmp(&b.name));

        let (changes, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(state),
            changes,
            role_lookups: AtomicUsize::new(0),
        }
    }

    /// How many times `has_admin_role` has been called.
    pub fn role_lookups(&self) -> usize {
        self.role_lookups.load(Ordering::SeqCst)
    }

    /// Id of a taxonomy entry by name.
    pub async fn entry_id(&self, taxonomy: Taxonomy, name: &str) -> Option<Uuid> {
        self.state
            .read()
            .await
            .entries(taxonomy)
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
    }

    /// Every stored title, across owners.
    pub async fn all_titles(&self) -> Vec<Title> {
        self.state.read().await.titles.clone()
    }

    fn publish(&self, change: TaxonomyChange) {
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_titles(&self, owner_id: Uuid, visibility: Visibility) -> RepoResult<Vec<Title>> {
        let state = self.state.read().await;
        // Newest first, as the database orders them.
        Ok(state
            .titles
            .iter()
            .rev()
            .filter(|t| t.owner_id == owner_id && visibility.matches(t.deleted))
            .cloned()
            .collect())
    }

    async fn get_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<Option<Title>> {
        let state = self.state.read().await;
        Ok(state
            .titles
            .iter()
            .find(|t| t.id == id && t.owner_id == owner_id)
            .cloned())
    }

    async fn insert_title(&self, owner_id: Uuid, title: CreateTitleRequest) -> RepoResult<Title> {
        let now = Utc::now();
        let created = Title {
            id: Uuid::new_v4(),
            owner_id,
            name: title.name,
            title_type: title.title_type,
            category: title.category,
            rating: title.rating,
            image: title.image,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.titles.push(created.clone());
        Ok(created)
    }

    async fn update_title(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: UpdateTitleRequest,
    ) -> RepoResult<Option<Title>> {
        let mut state = self.state.write().await;
        let Some(title) = state.owned_title_mut(id, owner_id) else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            title.name = name;
        }
        if let Some(title_type) = changes.title_type {
            title.title_type = title_type;
        }
        if let Some(category) = changes.category {
            title.category = category;
        }
        if let Some(rating) = changes.rating {
            title.rating = rating;
        }
        if let Some(image) = changes.image {
            title.image = Some(image);
        }
        title.updated_at = Utc::now();
        Ok(Some(title.clone()))
    }

    async fn set_title_deleted(
        &self,
        id: Uuid,
        owner_id: Uuid,
        deleted: bool,
    ) -> RepoResult<Option<Title>> {
        let mut state = self.state.write().await;
        Ok(state.owned_title_mut(id, owner_id).map(|title| {
            title.deleted = deleted;
            title.updated_at = Utc::now();
            title.clone()
        }))
    }

    async fn delete_title(&self, id: Uuid, owner_id: Uuid) -> RepoResult<bool> {
        let mut state = self.state.write().await;
        let before = state.titles.len();
        state
            .titles
            .retain(|t| !(t.id == id && t.owner_id == owner_id));
        Ok(state.titles.len() < before)
    }

    async fn list_entries(&self, taxonomy: Taxonomy) -> RepoResult<Vec<TaxonomyEntry>> {
        Ok(self.state.read().await.entries(taxonomy).clone())
    }

    async fn create_entry(&self, taxonomy: Taxonomy, name: &str) -> RepoResult<TaxonomyEntry> {
        let mut state = self.state.write().await;
        let entries = state.entries_mut(taxonomy);
        if entries.iter().any(|e| e.name == name) {
            return Err(RepositoryError::Conflict(format!("'{}' already exists", name)));
        }

        let now = Utc::now();
        let entry = TaxonomyEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        entries.push(entry.clone());
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        drop(state);

        self.publish(TaxonomyChange::Inserted {
            taxonomy,
            name: name.to_string(),
        });
        Ok(entry)
    }

    async fn rename_entry(
        &self,
        taxonomy: Taxonomy,
        id: Uuid,
        name: &str,
    ) -> RepoResult<Option<TaxonomyEntry>> {
        let mut state = self.state.write().await;
        let entries = state.entries_mut(taxonomy);
        if entries.iter().any(|e| e.name == name && e.id != id) {
            return Err(RepositoryError::Conflict(format!("'{}' already exists", name)));
        }
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };

        let from = std::mem::replace(&mut entry.name, name.to_string());
        entry.updated_at = Utc::now();
        let renamed = entry.clone();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        drop(state);

        if from != renamed.name {
            self.publish(TaxonomyChange::Renamed {
                taxonomy,
                from,
                to: renamed.name.clone(),
            });
        }
        Ok(Some(renamed))
    }

    async fn delete_entry(&self, taxonomy: Taxonomy, id: Uuid) -> RepoResult<bool> {
        let mut state = self.state.write().await;
        let entries = state.entries_mut(taxonomy);
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };
        let removed = entries.remove(index);
        drop(state);

        self.publish(TaxonomyChange::Deleted {
            taxonomy,
            name: removed.name,
        });
        Ok(true)
    }

    fn subscribe_taxonomy_changes(&self) -> broadcast::Receiver<TaxonomyChange> {
        self.changes.subscribe()
    }

    async fn has_admin_role(&self, user_id: Uuid) -> RepoResult<bool> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.read().await.admins.contains(&user_id))
    }

    async fn set_admin_role(&self, user_id: Uuid, is_admin: bool) -> RepoResult<()> {
        let mut state = self.state.write().await;
        if is_admin {
            state.admins.insert(user_id);
        } else {
            state.admins.remove(&user_id);
        }
        Ok(())
    }

    async fn admin_user_ids(&self) -> RepoResult<Vec<Uuid>> {
        Ok(self.state.read().await.admins.iter().copied().collect())
    }

    async fn get_stats(&self) -> RepoResult<AdminStats> {
        let state = self.state.read().await;
        let active: Vec<&Title> = state.titles.iter().filter(|t| !t.deleted).collect();

        let count_where = |pred: &dyn Fn(&Title) -> bool| -> i64 {
            active.iter().filter(|t| pred(t)).count() as i64
        };

        let titles_per_category = state
            .categories
            .iter()
            .map(|c| NamedCount {
                name: c.name.clone(),
                count: count_where(&|t| t.category == c.name),
            })
            .collect();
        let titles_per_type = state
            .types
            .iter()
            .map(|ty| NamedCount {
                name: ty.name.clone(),
                count: count_where(&|t| t.title_type.as_str() == ty.name),
            })
            .collect();

        Ok(AdminStats {
            total_titles: active.len() as i64,
            total_categories: state.categories.len() as i64,
            total_types: state.types.len() as i64,
            titles_per_category,
            titles_per_type,
            total_users: 0,
        })
    }
}
