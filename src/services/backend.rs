//! The key-object store the item engine sits on.
//!
//! A backend is bound to one bucket and offers flat S3-like primitives:
//! list by prefix, get, put, head and delete. It knows nothing about JSON.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

use crate::models::object::ObjectMeta;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Bucket this backend is bound to.
    fn bucket(&self) -> &str;
    /// Metadata for keys starting with `prefix`, in key order, at most `max_keys` entries.
    async fn list(&self, prefix: &str, max_keys: usize) -> StorageResult<Vec<ObjectMeta>>;
    /// Full body of `key`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;
    /// Store `body` at `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<ObjectMeta>;
    /// Metadata of `key` without its body.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;
    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;
    /// Cheap round trip used by readiness probes.
    async fn ping(&self) -> StorageResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects keys that are empty, too long, begin with `/`, contain `..`, or
/// contain control characters or backslashes.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid(
            "must start and end with a lowercase letter or digit",
        ));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
