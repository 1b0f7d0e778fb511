//! Represents a stored object as reported by the backend, independent of its body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::item::Item;

/// Store-reported attributes of a single key.
///
/// Returned by listing and by metadata probes; never carries the body.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ObjectMeta {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the body.
    pub etag: Option<String>,
}

/// A listed object paired with its parsed body.
#[derive(Serialize, Clone, Debug)]
pub struct QueryHit {
    pub metadata: ObjectMeta,
    pub data: Item,
}

/// One window of a filtered, newest-first result set.
#[derive(Serialize, Clone, Debug)]
pub struct QueryPage {
    pub items: Vec<QueryHit>,
    /// Post-filter count, before windowing.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}
