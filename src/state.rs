//! Shared per-process state handed to every handler.

use std::sync::Arc;

use crate::services::{auth::AuthClient, item_store::ItemStore};

#[derive(Clone)]
pub struct AppState {
    pub store: ItemStore,
    pub auth: AuthClient,
    /// When false, item routes run tenantless without token checks.
    pub auth_enabled: bool,
    /// Fields a create request must carry.
    pub required_fields: Arc<[String]>,
}

impl AppState {
    pub fn new(
        store: ItemStore,
        auth: AuthClient,
        auth_enabled: bool,
        required_fields: Vec<String>,
    ) -> Self {
        Self {
            store,
            auth,
            auth_enabled,
            required_fields: required_fields.into(),
        }
    }
}
