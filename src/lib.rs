//! Multi-tenant JSON items over a flat key-object store.
//!
//! [`services::item_store::ItemStore`] is the engine: insert, point lookup,
//! point update, delete and a list → filter → paginate query over any
//! [`services::backend::ObjectBackend`]. The rest wires it to HTTP.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::routes::routes;
pub use state::AppState;
