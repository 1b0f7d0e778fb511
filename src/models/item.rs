//! Items: arbitrary JSON objects with a few conventional identity fields.
//!
//! The store itself does not enforce any of these fields. The helpers here
//! implement the create/update rules the handlers rely on:
//! - `id`, `created_at` and `tenant_id` are fixed at creation
//! - `updated_at` is refreshed on every update
//! - the storage key is derived from tenant and id and never changes

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A JSON document stored under a unique key.
pub type Item = Map<String, Value>;

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";
pub const FIELD_TENANT_ID: &str = "tenant_id";

/// Key prefix used to scope listing to one caller's partition.
pub fn partition_prefix(tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant) => format!("tenants/{}/", tenant),
        None => "items/".to_string(),
    }
}

/// Storage key for an item: `tenants/{tenant}/{id}.json` or `items/{id}.json`.
pub fn item_key(tenant_id: Option<&str>, id: &str) -> String {
    format!("{}{}.json", partition_prefix(tenant_id), id)
}

/// Format a timestamp the way items carry them (RFC 3339, UTC, microseconds).
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn tenant_value(tenant_id: Option<&str>) -> Value {
    tenant_id
        .map(|t| Value::String(t.to_string()))
        .unwrap_or(Value::Null)
}

/// Build a freshly created item from a request body.
///
/// Caller-supplied fields are kept, but the server-assigned identity fields
/// always win so the stored `id` matches the key.
pub fn new_item(body: Item, tenant_id: Option<&str>, now: DateTime<Utc>) -> Item {
    let id = Uuid::new_v4().to_string();
    let ts = timestamp(now);

    let mut item = body;
    item.insert(FIELD_ID.into(), Value::String(id));
    item.insert(FIELD_CREATED_AT.into(), Value::String(ts.clone()));
    item.insert(FIELD_UPDATED_AT.into(), Value::String(ts));
    item.insert(FIELD_TENANT_ID.into(), tenant_value(tenant_id));
    item
}

/// Merge `patch` over `existing`, restoring the immutable fields afterwards.
pub fn merge_update(existing: &Item, patch: Item, id: &str, now: DateTime<Utc>) -> Item {
    let mut merged = existing.clone();
    merged.extend(patch);

    merged.insert(FIELD_ID.into(), Value::String(id.to_string()));
    merged.insert(
        FIELD_CREATED_AT.into(),
        existing
            .get(FIELD_CREATED_AT)
            .cloned()
            .unwrap_or(Value::Null),
    );
    merged.insert(FIELD_UPDATED_AT.into(), Value::String(timestamp(now)));
    merged.insert(
        FIELD_TENANT_ID.into(),
        existing.get(FIELD_TENANT_ID).cloned().unwrap_or(Value::Null),
    );
    merged
}

/// The tenant recorded on a stored item, if any.
pub fn owner(item: &Item) -> Option<&str> {
    item.get(FIELD_TENANT_ID).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn obj(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn keys_follow_tenant_partition() {
        assert_eq!(item_key(Some("t1"), "abc"), "tenants/t1/abc.json");
        assert_eq!(item_key(None, "abc"), "items/abc.json");
        assert_eq!(partition_prefix(Some("t1")), "tenants/t1/");
        assert_eq!(partition_prefix(None), "items/");
    }

    #[test]
    fn new_item_assigns_identity_fields() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let item = new_item(
            obj(json!({"name": "a", "id": "spoofed", "tenant_id": "other"})),
            Some("t1"),
            now,
        );

        assert_eq!(item["name"], "a");
        assert_ne!(item["id"], "spoofed");
        assert!(Uuid::parse_str(item["id"].as_str().unwrap()).is_ok());
        assert_eq!(item["tenant_id"], "t1");
        assert_eq!(item["created_at"], "2024-03-15T10:00:00.000000Z");
        assert_eq!(item["created_at"], item["updated_at"]);
    }

    #[test]
    fn new_item_without_tenant_stores_null() {
        let item = new_item(obj(json!({"name": "a"})), None, Utc::now());
        assert_eq!(item["tenant_id"], Value::Null);
        assert_eq!(owner(&item), None);
    }

    #[test]
    fn merge_update_keeps_immutable_fields() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let existing = new_item(obj(json!({"name": "a", "description": "d"})), Some("t1"), created);
        let id = existing["id"].as_str().unwrap().to_string();

        let merged = merge_update(
            &existing,
            obj(json!({
                "name": "b",
                "id": "other",
                "created_at": "1999-01-01",
                "tenant_id": "t2",
                "extra": 1
            })),
            &id,
            later,
        );

        assert_eq!(merged["name"], "b");
        assert_eq!(merged["description"], "d");
        assert_eq!(merged["extra"], 1);
        assert_eq!(merged["id"], Value::String(id));
        assert_eq!(merged["created_at"], existing["created_at"]);
        assert_eq!(merged["tenant_id"], "t1");
        assert_eq!(merged["updated_at"], "2024-02-01T00:00:00.000000Z");
    }
}
