//! HTTP handlers for item CRUD and the paginated listing.
//!
//! Every handler runs behind `middleware::resolve_tenant`, so the caller's
//! partition arrives as a [`Tenant`] extension. Keys are derived from tenant
//! and id; tenantless callers live under `items/`.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    errors::AppError,
    middleware::Tenant,
    models::item::{self, Item},
    services::{filters::DateRange, item_store::{ItemStore, StoreError}},
    state::AppState,
};

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 10;

/// Query params accepted by `GET /items`.
///
/// Numbers arrive as strings so malformed values become a JSON 400 rather
/// than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    pub items: Vec<Item>,
    pub pagination: Pagination,
}

/// `POST /items` — create an item owned by the caller's tenant.
pub async fn create_item(
    State(state): State<AppState>,
    Extension(tenant): Extension<Tenant>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let body = parse_body(&body)?;

    let (valid, missing) = ItemStore::validate(&body, Some(&*state.required_fields));
    if !valid {
        return Err(AppError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let new_item = item::new_item(body, tenant.as_deref(), Utc::now());
    let id = new_item
        .get(item::FIELD_ID)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let key = item::item_key(tenant.as_deref(), id);

    state.store.write(&new_item, Some(&key)).await?;
    info!("created item {}", key);

    Ok((StatusCode::CREATED, Json(new_item)))
}

/// `GET /items` — newest-first page of the caller's items, optionally date-filtered.
pub async fn list_items(
    State(state): State<AppState>,
    Extension(tenant): Extension<Tenant>,
    Query(q): Query<ListItemsQuery>,
) -> Result<Json<ListItemsResponse>, AppError> {
    let page = parse_positive(q.page.as_deref(), "page", DEFAULT_PAGE)?;
    let limit = parse_positive(q.limit.as_deref(), "limit", DEFAULT_LIMIT)?;
    let offset = (page - 1).saturating_mul(limit);

    let range = DateRange::new(non_empty(q.start), non_empty(q.end));
    let prefix = item::partition_prefix(tenant.as_deref());

    let result = if range.is_unbounded() {
        state
            .store
            .query::<fn(&Item) -> bool>(&prefix, None, offset, limit)
            .await?
    } else {
        state
            .store
            .query(&prefix, Some(|i: &Item| range.matches(i)), offset, limit)
            .await?
    };

    let pagination = Pagination {
        total: result.total,
        page,
        limit,
        pages: result.total.div_ceil(limit),
        has_more: result.has_more,
    };
    let items = result.items.into_iter().map(|hit| hit.data).collect();

    Ok(Json(ListItemsResponse { items, pagination }))
}

/// `GET /items/{id}`
pub async fn get_item(
    State(state): State<AppState>,
    Extension(tenant): Extension<Tenant>,
    Path(id): Path<String>,
) -> Result<Json<Item>, AppError> {
    let (_, existing) = load_owned(&state, &tenant, &id, "read").await?;
    Ok(Json(existing))
}

/// `PUT /items/{id}` — merge the body into the stored item.
///
/// `id`, `created_at` and `tenant_id` survive whatever the body says.
pub async fn update_item(
    State(state): State<AppState>,
    Extension(tenant): Extension<Tenant>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Item>, AppError> {
    let patch = parse_body(&body)?;
    let (key, existing) = load_owned(&state, &tenant, &id, "update").await?;

    let updated = item::merge_update(&existing, patch, &id, Utc::now());
    state
        .store
        .update(&key, &updated)
        .await
        .map_err(|err| not_found_message(err, &id))?;
    info!("updated item {}", key);

    Ok(Json(updated))
}

/// `DELETE /items/{id}`
///
/// An object in the caller's partition whose body no longer parses is still
/// deleted, so unreadable items can be cleared out.
pub async fn delete_item(
    State(state): State<AppState>,
    Extension(tenant): Extension<Tenant>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = checked_key(&tenant, &id)?;
    match state.store.get(&key).await {
        Ok(existing) => ensure_owner(&tenant, &existing, "delete")?,
        Err(StoreError::Parse { source, .. }) => {
            warn!("deleting unreadable item {}: {}", key, source);
        }
        Err(err) => return Err(not_found_message(err, &id)),
    }
    state.store.delete(&key).await?;
    info!("deleted item {}", key);
    Ok(StatusCode::NO_CONTENT)
}

/// Fetch the item `id` for `tenant`, enforcing ownership.
async fn load_owned(
    state: &AppState,
    tenant: &Tenant,
    id: &str,
    action: &str,
) -> Result<(String, Item), AppError> {
    let key = checked_key(tenant, id)?;
    let existing = state
        .store
        .get(&key)
        .await
        .map_err(|err| not_found_message(err, id))?;
    ensure_owner(tenant, &existing, action)?;
    Ok((key, existing))
}

fn checked_key(tenant: &Tenant, id: &str) -> Result<String, AppError> {
    if id.is_empty() || id.contains('/') || id.contains("..") {
        return Err(AppError::validation(format!("Invalid item ID `{}`", id)));
    }
    Ok(item::item_key(tenant.as_deref(), id))
}

fn ensure_owner(tenant: &Tenant, existing: &Item, action: &str) -> Result<(), AppError> {
    match tenant.as_deref() {
        Some(caller) if item::owner(existing) != Some(caller) => Err(AppError::forbidden(
            format!("Not authorized to {} this item", action),
        )),
        _ => Ok(()),
    }
}

fn not_found_message(err: StoreError, id: &str) -> AppError {
    match err {
        StoreError::NotFound(_) => AppError::not_found(format!("Item with ID {} not found", id)),
        other => other.into(),
    }
}

fn parse_body(body: &[u8]) -> Result<Item, AppError> {
    serde_json::from_slice::<Item>(body).map_err(|_| AppError::validation("Invalid request body"))
}

fn parse_positive(raw: Option<&str>, name: &str, default: usize) -> Result<usize, AppError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                AppError::validation(format!("`{}` must be a positive integer", name))
            }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
