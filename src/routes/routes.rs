//! Defines routes for the item service.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz` — backend readiness
//!
//! - **Authorizer**
//!   - `POST   /authorize` — token → IAM policy document
//!
//! - **Items** (behind tenant resolution)
//!   - `GET    /items` — newest-first page (`start`, `end`, `page`, `limit`)
//!   - `POST   /items` — create
//!   - `GET    /items/{id}` — point lookup
//!   - `PUT    /items/{id}` — merge update
//!   - `DELETE /items/{id}` — delete
//!
//! Every response, errors included, carries CORS headers.

use axum::{
    Router,
    middleware::{from_fn_with_state, map_response},
    routing::{get, post},
};

use crate::{
    handlers::{
        authorizer_handlers::authorize_handler,
        health_handlers::{healthz, readyz},
        item_handlers::{create_item, delete_item, get_item, list_items, update_item},
    },
    middleware::{cors_headers, resolve_tenant},
    state::AppState,
};

/// Build the full router with `state` attached.
pub fn routes(state: AppState) -> Router {
    let items = Router::new()
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/{id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route_layer(from_fn_with_state(state.clone(), resolve_tenant));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/authorize", post(authorize_handler))
        .merge(items)
        .layer(map_response(cors_headers))
        .with_state(state)
}
