//! Embedded default model
//!
//! The default overlay ships inside the binary so a project with no model
//! directory still builds. Each entry is one model file; names mirror the
//! on-disk `types/{category}` convention.

/// `(virtual path, contents)` pairs for the default overlay.
pub const DEFAULT_MODEL_FILES: &[(&str, &str)] = &[
    (
        "default/types/objects.toml",
        include_str!("../defaults/objects.toml"),
    ),
    (
        "default/types/floats.toml",
        include_str!("../defaults/floats.toml"),
    ),
    (
        "default/types/relations.toml",
        include_str!("../defaults/relations.toml"),
    ),
    (
        "default/types/views.toml",
        include_str!("../defaults/views.toml"),
    ),
    (
        "default/types/specifications.toml",
        include_str!("../defaults/specifications.toml"),
    ),
];
