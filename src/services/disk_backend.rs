//! src/services/disk_backend.rs
//!
//! DiskBackend — object primitives backed by SQLite for metadata and local
//! disk for object payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::{
    ObjectBackend, StorageError, StorageResult, ensure_bucket_name_safe, ensure_key_safe,
};
use crate::models::object::ObjectMeta;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// A bucket-scoped object store on the local machine.
#[derive(Clone)]
pub struct DiskBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
}

impl DiskBackend {
    /// Create a backend over `db` storing payloads for `bucket` under `base_path`.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
    ) -> StorageResult<Self> {
        let bucket = bucket.into();
        ensure_bucket_name_safe(&bucket)?;
        Ok(Self {
            db,
            base_path: base_path.into(),
            bucket,
        })
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard identifiers: first two bytes of MD5(bucket/key), hex.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    async fn fetch_object(&self, key: &str) -> StorageResult<ObjectMeta> {
        sqlx::query_as::<_, ObjectMeta>(
            "SELECT key, last_modified, size_bytes, etag
             FROM objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(&self.bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => self.not_found(key),
            other => StorageError::Sqlx(other),
        })
    }

    /// Write `body` to a temp file beside `file_path` and fsync it. The caller
    /// moves it into place with [`Self::promote_payload`] or removes it.
    async fn stage_payload(&self, file_path: &Path, body: &[u8]) -> StorageResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(tmp_path)
    }

    async fn promote_payload(&self, tmp_path: &Path, file_path: &Path) -> io::Result<()> {
        match fs::rename(tmp_path, file_path).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await
            }
            other => other,
        }
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for DiskBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> StorageResult<Vec<ObjectMeta>> {
        // substr comparison keeps the match literal and case-sensitive, unlike LIKE.
        let rows = sqlx::query_as::<_, ObjectMeta>(
            "SELECT key, last_modified, size_bytes, etag
             FROM objects
             WHERE bucket = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC
             LIMIT ?",
        )
        .bind(&self.bucket)
        .bind(prefix)
        .bind(prefix)
        .bind(max_keys as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await?;

        match fs::read(self.object_path(key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(self.not_found(key)),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<ObjectMeta> {
        ensure_key_safe(key)?;

        // The old payload is replaced only after the upsert succeeds inside
        // the transaction; earlier failures leave the stored object intact.
        let file_path = self.object_path(key);
        let tmp_path = self.stage_payload(&file_path, &body).await?;

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let etag = format!("{:x}", md5::compute(&body));
        let upsert = sqlx::query_as::<_, ObjectMeta>(
            r#"
            INSERT INTO objects (bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, last_modified, size_bytes, etag
            "#,
        )
        .bind(&self.bucket)
        .bind(key)
        .bind(content_type)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let meta = match upsert {
            Ok(meta) => meta,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        if let Err(err) = self.promote_payload(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback after failed rename of {} failed: {}", key, rollback);
            }
            return Err(StorageError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            warn!("payload for {} replaced but metadata commit failed: {}", key, err);
            return Err(StorageError::Sqlx(err));
        }
        Ok(meta)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;

        sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(&self.bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        let probe = self.base_path.join(format!(".ping-{}", Uuid::new_v4()));
        fs::write(&probe, b"ping").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"ping" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    async fn backend() -> (DiskBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = DiskBackend::new(Arc::new(pool), dir.path(), "test-bucket").unwrap();
        backend.migrate().await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn put_then_get_returns_body() {
        let (backend, _dir) = backend().await;
        let meta = backend
            .put("items/a.json", Bytes::from_static(b"{\"a\":1}"), "application/json")
            .await
            .unwrap();

        assert_eq!(meta.key, "items/a.json");
        assert_eq!(meta.size_bytes, 7);
        assert_eq!(
            meta.etag.as_deref(),
            Some(format!("{:x}", md5::compute(b"{\"a\":1}")).as_str())
        );
        assert_eq!(
            backend.get("items/a.json").await.unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let (backend, _dir) = backend().await;
        backend
            .put("items/a.json", Bytes::from_static(b"1"), "application/json")
            .await
            .unwrap();
        backend
            .put("items/a.json", Bytes::from_static(b"22"), "application/json")
            .await
            .unwrap();

        assert_eq!(backend.head("items/a.json").await.unwrap().size_bytes, 2);
        assert_eq!(backend.list("", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_matches_prefix_literally() {
        let (backend, _dir) = backend().await;
        for key in [
            "tenants/t1/a.json",
            "tenants/t1/b.json",
            "tenants/T1/c.json",
            "tenants/t10/d.json",
            "items/x_y.json",
        ] {
            backend
                .put(key, Bytes::from_static(b"{}"), "application/json")
                .await
                .unwrap();
        }

        let keys: Vec<String> = backend
            .list("tenants/t1/", 100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["tenants/t1/a.json", "tenants/t1/b.json"]);

        assert!(backend.list("items/x%", 100).await.unwrap().is_empty());
        assert_eq!(backend.list("items/x_", 100).await.unwrap().len(), 1);
        assert_eq!(backend.list("tenants/", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let (backend, _dir) = backend().await;
        assert!(matches!(
            backend.get("items/missing.json").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            backend.head("items/missing.json").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_shards() {
        let (backend, dir) = backend().await;
        backend
            .put("items/a.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();
        let path = backend.object_path("items/a.json");
        assert!(path.exists());

        backend.delete("items/a.json").await.unwrap();
        backend.delete("items/a.json").await.unwrap();

        assert!(!path.exists());
        assert!(backend.list("", 10).await.unwrap().is_empty());
        let bucket_root = dir.path().join("test-bucket");
        let leftovers = std::fs::read_dir(&bucket_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn rejects_unsafe_keys_before_touching_disk() {
        let (backend, _dir) = backend().await;
        assert!(matches!(
            backend
                .put("../escape.json", Bytes::from_static(b"{}"), "application/json")
                .await,
            Err(StorageError::InvalidObjectKey)
        ));
    }

    #[tokio::test]
    async fn failed_overwrite_keeps_previous_object() {
        let dir = TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("meta.db"))
            .create_if_missing(true);
        let pool_a = Arc::new(SqlitePool::connect_with(options.clone()).await.unwrap());
        let pool_b = Arc::new(SqlitePool::connect_with(options).await.unwrap());
        let objects = dir.path().join("objects");

        let writer = DiskBackend::new(pool_a.clone(), &objects, "test-bucket").unwrap();
        let reader = DiskBackend::new(pool_b, &objects, "test-bucket").unwrap();
        writer.migrate().await.unwrap();
        writer
            .put("items/x.json", Bytes::from_static(b"{\"v\":1}"), "application/json")
            .await
            .unwrap();

        pool_a.close().await;
        assert!(matches!(
            writer
                .put("items/x.json", Bytes::from_static(b"{\"v\":2}"), "application/json")
                .await,
            Err(StorageError::Sqlx(_))
        ));

        assert_eq!(
            reader.get("items/x.json").await.unwrap(),
            Bytes::from_static(b"{\"v\":1}")
        );
        assert_eq!(reader.head("items/x.json").await.unwrap().size_bytes, 7);
        let shard = reader.object_path("items/x.json");
        let siblings = std::fs::read_dir(shard.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(siblings, vec!["x.json"]);
    }

    #[tokio::test]
    async fn ping_checks_database_and_disk() {
        let (backend, _dir) = backend().await;
        backend.ping().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_bucket_names() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        assert!(matches!(
            DiskBackend::new(Arc::new(pool), "/tmp", "Bad_Bucket"),
            Err(StorageError::InvalidBucketName { .. })
        ));
    }
}
