//! HTTP handlers. Storage concerns are delegated to `ItemStore`.

pub mod authorizer_handlers;
pub mod health_handlers;
pub mod item_handlers;
