//! Core data models for the knowledge store.
//!
//! Objects and chunks map to SQLite tables via `sqlx::FromRow`; the location
//! hierarchy and tag vocabulary are per-user JSON documents. Everything
//! serializes naturally as JSON via `serde`.

pub mod chunk;
pub mod location;
pub mod object;
pub mod tag;
