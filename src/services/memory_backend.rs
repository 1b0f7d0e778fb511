//! In-process backend. Used by tests and for throwaway runs with `--backend memory`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::backend::{ObjectBackend, StorageError, StorageResult, ensure_key_safe};
use crate::models::object::ObjectMeta;

#[derive(Debug)]
struct StoredObject {
    meta: ObjectMeta,
    body: Bytes,
}

#[derive(Debug)]
pub struct MemoryBackend {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> StorageResult<Vec<ObjectMeta>> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_keys)
            .map(|(_, stored)| stored.meta.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|stored| stored.body.clone())
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> StorageResult<ObjectMeta> {
        ensure_key_safe(key)?;
        let meta = ObjectMeta {
            key: key.to_string(),
            last_modified: Utc::now(),
            size_bytes: body.len() as i64,
            etag: Some(format!("{:x}", md5::compute(&body))),
        };
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                meta: meta.clone(),
                body,
            },
        );
        Ok(meta)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|stored| stored.meta.clone())
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
