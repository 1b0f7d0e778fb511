//! Storage engine, backends and the auth client.

pub mod auth;
pub mod backend;
pub mod disk_backend;
pub mod filters;
pub mod item_store;
pub mod memory_backend;
