//! Type model registry
//!
//! Types are declared in TOML files under `types/{category}/`, loaded from
//! two overlays in order: the default model embedded in the binary, then
//! the project model. Registration upserts by identifier, so a project may
//! replace or extend any default type. The registry persists itself into
//! the store's type tables (recreated on every run) and answers the alias
//! and default lookups the initializer needs.

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::TypeRegistry;
pub use types::{
    AttributeTypeDef, Datatype, FloatTypeDef, ObjectTypeDef, RelationTypeDef,
    SpecificationTypeDef, ViewTypeDef, format_pid,
};

use thiserror::Error;

/// Model loading errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Invalid model file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Unknown model template '{name}'")]
    UnknownTemplate { name: String },

    #[error("Invalid pid_format '{format}' for type '{type_id}': {reason}")]
    InvalidPidFormat {
        format: String,
        type_id: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] speccompiler_store::StoreError),
}
