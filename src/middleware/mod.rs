//! Request/response layers shared by every route.

pub mod auth;
pub mod cors;

pub use auth::{Tenant, resolve_tenant};
pub use cors::cors_headers;
