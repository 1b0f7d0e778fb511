//! Core data models for the item service.
//!
//! Items are schemaless JSON objects; object metadata is what the backing
//! store reports about a key independent of its body.

pub mod item;
pub mod object;
