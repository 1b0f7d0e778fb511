//! src/services/item_store.rs
//!
//! ItemStore — JSON items over an [`ObjectBackend`]: insert, point lookup,
//! point update, delete, and the composite list → filter → paginate query.
//!
//! Multi-item operations never abort because of one bad object: a body that
//! fails to load or parse is logged and skipped.

use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{cmp::Reverse, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::{ObjectBackend, StorageError};
use crate::models::{
    item::Item,
    object::{ObjectMeta, QueryHit, QueryPage},
};

pub const DEFAULT_LIST_MAX_ITEMS: usize = 1000;
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item `{0}` not found")]
    NotFound(String),
    #[error("item `{key}` is not a JSON object: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize item: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(StorageError),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { key, .. } => StoreError::NotFound(key),
            other => StoreError::Backend(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct ItemStore {
    backend: Arc<dyn ObjectBackend>,
    list_max_items: usize,
    fetch_concurrency: usize,
}

impl ItemStore {
    /// Engine over `backend` with the default listing cap and serial body fetches.
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            list_max_items: DEFAULT_LIST_MAX_ITEMS,
            fetch_concurrency: 1,
        }
    }

    /// Cap applied when `list` is called without an explicit maximum, and by `query`.
    pub fn with_list_max_items(mut self, max: usize) -> Self {
        self.list_max_items = max.max(1);
        self
    }

    /// How many bodies `query` fetches at once. 1 keeps fetches strictly serial.
    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// Metadata for every key under `prefix`, at most `max_items` (or the configured cap).
    pub async fn list(&self, prefix: &str, max_items: Option<usize>) -> StoreResult<Vec<ObjectMeta>> {
        let max = max_items.unwrap_or(self.list_max_items);
        Ok(self.backend.list(prefix, max).await?)
    }

    /// Fetch and parse one item.
    pub async fn get(&self, key: &str) -> StoreResult<Item> {
        let body = self.backend.get(key).await?;
        serde_json::from_slice::<Item>(&body).map_err(|source| StoreError::Parse {
            key: key.to_string(),
            source,
        })
    }

    /// Store `data` at `key`, or at a generated `items/{timestamp}-{uuid}.json` key.
    ///
    /// Overwrites silently; there is no concurrency check.
    pub async fn write(&self, data: &Item, key: Option<&str>) -> StoreResult<String> {
        let key = match key {
            Some(key) => key.to_string(),
            None => generated_key(),
        };
        let body = serde_json::to_vec(data)?;
        self.backend
            .put(&key, Bytes::from(body), JSON_CONTENT_TYPE)
            .await?;
        debug!("wrote item {}", key);
        Ok(key)
    }

    /// Replace an existing item wholesale. A missing key is `NotFound` and nothing is written.
    ///
    /// Preserving immutable fields is the caller's job; see `models::item::merge_update`.
    pub async fn update(&self, key: &str, data: &Item) -> StoreResult<String> {
        self.backend.head(key).await?;
        self.write(data, Some(key)).await
    }

    /// Remove an item. Removing a missing key succeeds.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(key).await?;
        Ok(())
    }

    /// List, sort newest first, filter, then cut the `[offset, offset + limit)` window.
    ///
    /// Every listed body is fetched before windowing, with or without a
    /// predicate, so cost grows with the size of the prefix rather than with
    /// `limit`.
    pub async fn query<F>(
        &self,
        prefix: &str,
        predicate: Option<F>,
        offset: usize,
        limit: usize,
    ) -> StoreResult<QueryPage>
    where
        F: Fn(&Item) -> bool,
    {
        let mut listing = self.list(prefix, None).await?;
        listing.sort_by(|a, b| {
            Reverse(a.last_modified)
                .cmp(&Reverse(b.last_modified))
                .then_with(|| a.key.cmp(&b.key))
        });

        let fetched: Vec<(ObjectMeta, StoreResult<Item>)> = stream::iter(listing)
            .map(|meta| async move {
                let item = self.get(&meta.key).await;
                (meta, item)
            })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut hits = Vec::with_capacity(fetched.len());
        for (metadata, item) in fetched {
            match item {
                Ok(data) => {
                    if predicate.as_ref().is_none_or(|keep| keep(&data)) {
                        hits.push(QueryHit { metadata, data });
                    }
                }
                Err(err) => warn!("skipping {} during query: {}", metadata.key, err),
            }
        }

        let total = hits.len();
        let start = offset.min(total);
        let end = offset.saturating_add(limit).min(total);
        let items = hits.drain(start..end).collect();

        Ok(QueryPage {
            items,
            total,
            offset,
            limit,
            has_more: end < total,
        })
    }

    /// Presence-only check of required top-level fields.
    ///
    /// Returns whether all are present and the names of the missing ones.
    pub fn validate(data: &Item, required_fields: Option<&[String]>) -> (bool, Vec<String>) {
        let Some(required) = required_fields else {
            return (true, Vec::new());
        };
        let missing: Vec<String> = required
            .iter()
            .filter(|field| !data.contains_key(field.as_str()))
            .cloned()
            .collect();
        (missing.is_empty(), missing)
    }
}

fn generated_key() -> String {
    format!(
        "items/{}-{}.json",
        Utc::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4()
    )
}
