//! Embedded relational store for the specification intermediate representation
//!
//! A single SQLite file under the build directory holds everything the
//! pipeline knows: typed objects, attributes, floats, views and relations
//! (SPEC-IR), the type definitions loaded from the model overlays, the
//! include build graph, the output cache and the full-text indices.
//!
//! Type tables are dropped and recreated from the model on every open, so
//! the schema is versionless by construction; content and build tables
//! persist across runs.

pub mod error;
pub mod fts;
pub mod pivot;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use store::Store;
