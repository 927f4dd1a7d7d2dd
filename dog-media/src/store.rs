use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{ItemId, MediaError, MediaKind, MediaResult};

/// A placed file as recorded by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub item_id: ItemId,
    pub project: String,
    pub owner: String,
    pub kind: MediaKind,
    pub primary_path: PathBuf,
    /// `None` until a preview has been generated, or for kinds without one
    pub preview_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub attributes: serde_json::Value,
}

impl StoredItem {
    /// Display name used for downloads
    pub fn file_name(&self) -> String {
        self.primary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.item_id.to_string())
    }

    /// Usable preview path, treating an empty path as no preview
    pub fn preview(&self) -> Option<&PathBuf> {
        self.preview_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Everything needed to record a new item; the store assigns the id
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub project: String,
    pub owner: String,
    pub kind: MediaKind,
    pub primary_path: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    pub attributes: serde_json::Value,
}

impl ItemDraft {
    pub fn new<P: Into<String>, O: Into<String>>(project: P, owner: O, primary_path: PathBuf) -> Self {
        Self {
            project: project.into(),
            owner: owner.into(),
            kind: MediaKind::from_path(&primary_path),
            primary_path,
            created_at: None,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Record store keyed by item id. Owned by the surrounding application;
/// this crate only reads items and writes their path fields.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Record a new item. A record already pointing at the same primary
    /// path is replaced.
    async fn create(&self, draft: ItemDraft) -> MediaResult<StoredItem>;

    /// Look up an item
    async fn get(&self, item_id: ItemId) -> MediaResult<Option<StoredItem>>;

    /// Insert or overwrite a full record
    async fn upsert(&self, item: StoredItem) -> MediaResult<StoredItem>;

    /// Point an item at its preview, or clear the pointer
    async fn set_preview(&self, item_id: ItemId, preview_path: Option<PathBuf>) -> MediaResult<()>;

    /// Remove an item; returns the removed record
    async fn delete(&self, item_id: ItemId) -> MediaResult<Option<StoredItem>>;
}

/// In-memory metadata store for tests and single-process deployments
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    items: Arc<RwLock<HashMap<ItemId, StoredItem>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, draft: ItemDraft) -> MediaResult<StoredItem> {
        let now = Utc::now();
        let item = StoredItem {
            item_id: ItemId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            project: draft.project,
            owner: draft.owner,
            kind: draft.kind,
            primary_path: draft.primary_path,
            preview_path: None,
            created_at: draft.created_at.unwrap_or(now),
            last_access: now,
            attributes: draft.attributes,
        };

        let mut items = self.items.write().await;
        items.retain(|_, existing| existing.primary_path != item.primary_path);
        items.insert(item.item_id, item.clone());
        Ok(item)
    }

    async fn get(&self, item_id: ItemId) -> MediaResult<Option<StoredItem>> {
        Ok(self.items.read().await.get(&item_id).cloned())
    }

    async fn upsert(&self, item: StoredItem) -> MediaResult<StoredItem> {
        self.next_id.fetch_max(item.item_id.0, Ordering::SeqCst);
        self.items.write().await.insert(item.item_id, item.clone());
        Ok(item)
    }

    async fn set_preview(&self, item_id: ItemId, preview_path: Option<PathBuf>) -> MediaResult<()> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| MediaError::item_not_found(item_id))?;
        item.preview_path = preview_path;
        Ok(())
    }

    async fn delete(&self, item_id: ItemId) -> MediaResult<Option<StoredItem>> {
        Ok(self.items.write().await.remove(&item_id))
    }
}
