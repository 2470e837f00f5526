//! Overlay loading and the in-memory registry

use crate::defaults::DEFAULT_MODEL_FILES;
use crate::types::{
    DatatypeDef, FloatTypeDef, ModelFile, ObjectTypeDef, RelationTypeDef, SpecificationTypeDef,
    ViewTypeDef, normalize_aliases,
};
use crate::ModelError;
use speccompiler_store::Store;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// In-memory type registry built from the default and project overlays.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    objects: BTreeMap<String, ObjectTypeDef>,
    floats: BTreeMap<String, FloatTypeDef>,
    relations: BTreeMap<String, RelationTypeDef>,
    views: BTreeMap<String, ViewTypeDef>,
    specifications: BTreeMap<String, SpecificationTypeDef>,
    datatypes: BTreeMap<String, DatatypeDef>,
}

impl TypeRegistry {
    /// Load the embedded default overlay, then the project overlay from
    /// `<project_root>/model/types` when that directory exists.
    pub fn load(project_root: &Path, template: &str) -> Result<Self, ModelError> {
        if template != "default" {
            // Only the embedded default template ships with the binary; a
            // project template is its overlay directory.
            let template_dir = project_root.join(template).join("types");
            if !template_dir.is_dir() {
                return Err(ModelError::UnknownTemplate {
                    name: template.to_string(),
                });
            }
        }

        let mut registry = Self::default();
        for (path, contents) in DEFAULT_MODEL_FILES {
            let file: ModelFile =
                toml::from_str(contents).map_err(|e| ModelError::ParseFailed {
                    path: (*path).to_string(),
                    reason: e.to_string(),
                })?;
            registry.merge(file);
        }

        let overlay_dir = if template == "default" {
            project_root.join("model").join("types")
        } else {
            project_root.join(template).join("types")
        };
        if overlay_dir.is_dir() {
            registry.load_dir(&overlay_dir)?;
        }
        Ok(registry)
    }

    fn load_dir(&mut self, dir: &Path) -> Result<(), ModelError> {
        let mut paths = Vec::new();
        collect_toml_files(dir, &mut paths)?;
        paths.sort();
        for path in paths {
            let contents = fs::read_to_string(&path).map_err(|e| ModelError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let file: ModelFile =
                toml::from_str(&contents).map_err(|e| ModelError::ParseFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            debug!(path = %path.display(), "loaded model overlay file");
            self.merge(file);
        }
        Ok(())
    }

    /// Upsert every declaration from one model file.
    pub fn merge(&mut self, file: ModelFile) {
        for def in file.objects {
            self.objects.insert(def.identifier.clone(), def);
        }
        for def in file.floats {
            self.floats.insert(def.identifier.clone(), def);
        }
        for def in file.relations {
            self.relations.insert(def.identifier.clone(), def);
        }
        for def in file.views {
            self.views.insert(def.identifier.clone(), def);
        }
        for def in file.specifications {
            self.specifications.insert(def.identifier.clone(), def);
        }
        for def in file.datatypes {
            self.datatypes.insert(def.identifier.clone(), def);
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    #[must_use]
    pub fn object_type(&self, identifier: &str) -> Option<&ObjectTypeDef> {
        self.objects.get(identifier)
    }

    /// Resolve an authored type name against identifiers and aliases,
    /// case-insensitively.
    #[must_use]
    pub fn resolve_object(&self, name: &str) -> Option<&ObjectTypeDef> {
        let needle = name.trim().to_lowercase();
        self.objects.values().find(|def| {
            def.identifier.to_lowercase() == needle
                || def.aliases.iter().any(|a| a.to_lowercase() == needle)
        })
    }

    /// Implicit alias resolution for headings without an explicit type:
    /// the whole title is matched against aliases and long names.
    #[must_use]
    pub fn resolve_object_implicit(&self, title: &str) -> Option<&ObjectTypeDef> {
        let needle = title.trim().to_lowercase();
        self.objects.values().find(|def| {
            def.aliases.iter().any(|a| a.to_lowercase() == needle)
                || def
                    .long_name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase() == needle)
        })
    }

    #[must_use]
    pub fn default_object_type(&self) -> Option<&ObjectTypeDef> {
        self.objects.values().find(|def| def.is_default)
    }

    #[must_use]
    pub fn float_type(&self, identifier: &str) -> Option<&FloatTypeDef> {
        self.floats.get(identifier)
    }

    #[must_use]
    pub fn resolve_float(&self, name: &str) -> Option<&FloatTypeDef> {
        let needle = name.trim().to_lowercase();
        self.floats.values().find(|def| {
            def.identifier.to_lowercase() == needle
                || def.aliases.iter().any(|a| a.to_lowercase() == needle)
        })
    }

    pub fn float_types(&self) -> impl Iterator<Item = &FloatTypeDef> {
        self.floats.values()
    }

    #[must_use]
    pub fn view_type(&self, identifier: &str) -> Option<&ViewTypeDef> {
        self.views.get(identifier)
    }

    /// Resolve an inline/block view prefix against `inline_prefix`,
    /// identifier and aliases.
    #[must_use]
    pub fn resolve_view_prefix(&self, prefix: &str) -> Option<&ViewTypeDef> {
        let needle = prefix.trim().to_lowercase();
        self.views.values().find(|def| {
            def.inline_prefix
                .as_deref()
                .is_some_and(|p| p.to_lowercase() == needle)
                || def.identifier.to_lowercase() == needle
                || def.aliases.iter().any(|a| a.to_lowercase() == needle)
        })
    }

    pub fn view_types(&self) -> impl Iterator<Item = &ViewTypeDef> {
        self.views.values()
    }

    #[must_use]
    pub fn resolve_specification(&self, name: &str) -> Option<&SpecificationTypeDef> {
        let needle = name.trim().to_lowercase();
        self.specifications.values().find(|def| {
            def.identifier.to_lowercase() == needle
                || def.aliases.iter().any(|a| a.to_lowercase() == needle)
        })
    }

    #[must_use]
    pub fn default_specification_type(&self) -> Option<&SpecificationTypeDef> {
        self.specifications.values().find(|def| def.is_default)
    }

    /// Effective link selector for a relation type, following `extends`.
    #[must_use]
    pub fn effective_selector(&self, identifier: &str) -> Option<String> {
        let mut current = self.relations.get(identifier)?;
        let mut hops = 0;
        loop {
            if let Some(selector) = &current.link_selector {
                return Some(selector.clone());
            }
            let parent = current.extends.as_deref()?;
            current = self.relations.get(parent)?;
            hops += 1;
            if hops > self.relations.len() {
                return None;
            }
        }
    }

    /// All distinct registered selectors, longest first, so that prefix
    /// matching prefers `@cite` over `@`.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = self
            .relations
            .keys()
            .filter_map(|id| self.effective_selector(id))
            .collect();
        selectors.sort();
        selectors.dedup();
        selectors.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        selectors
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write every type into the store's freshly recreated type tables.
    pub fn persist(&self, store: &Store) -> Result<(), ModelError> {
        store.begin()?;
        match self.persist_inner(store) {
            Ok(()) => {
                store.commit()?;
                Ok(())
            }
            Err(e) => {
                let _ = store.rollback();
                Err(e)
            }
        }
    }

    fn persist_inner(&self, store: &Store) -> Result<(), ModelError> {
        for def in self.objects.values() {
            store.execute(
                "INSERT INTO object_types(identifier, long_name, extends, is_composite,
                    is_default, pid_prefix, pid_format, aliases)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                &[
                    &def.identifier,
                    &def.long_name,
                    &def.extends,
                    &def.is_composite,
                    &def.is_default,
                    &def.pid_prefix,
                    &def.pid_format,
                    &normalize_aliases(&def.aliases),
                ],
            )?;
            for attr in &def.attributes {
                store.execute(
                    "INSERT INTO attribute_types(object_type_ref, name, datatype,
                        min_occurs, max_occurs, min_value, max_value)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    &[
                        &def.identifier,
                        &attr.name,
                        &attr.datatype.as_str(),
                        &attr.min_occurs,
                        &attr.max_occurs,
                        &attr.min_value,
                        &attr.max_value,
                    ],
                )?;
                let attr_id = store.last_insert_rowid();
                for value in &attr.enum_values {
                    store.execute(
                        "INSERT INTO enum_values(attribute_type_id, value) VALUES(?1, ?2)",
                        &[&attr_id, value],
                    )?;
                }
            }
        }

        for def in self.floats.values() {
            let command = if def.render_command.is_empty() {
                None
            } else {
                Some(def.render_command.join("\u{1f}"))
            };
            store.execute(
                "INSERT INTO float_types(identifier, caption_format, counter_group, aliases,
                    style_id, needs_external_render, render_command, render_timeout_secs,
                    output_ext, source_ext)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                &[
                    &def.identifier,
                    &def.caption_format,
                    &def.counter_group(),
                    &normalize_aliases(&def.aliases),
                    &def.style_id,
                    &def.needs_external_render,
                    &command,
                    &def.render_timeout_secs.map(|t| t as i64),
                    &def.output_ext,
                    &def.source_ext,
                ],
            )?;
        }

        for def in self.relations.values() {
            store.execute(
                "INSERT INTO relation_types(identifier, extends, link_selector,
                    source_type_ref, target_type_ref, source_attribute, aliases, is_default)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                &[
                    &def.identifier,
                    &def.extends,
                    &self.effective_selector(&def.identifier),
                    &def.source_type_ref,
                    &def.target_type_ref,
                    &def.source_attribute,
                    &normalize_aliases(&def.aliases),
                    &def.is_default,
                ],
            )?;
        }

        for def in self.views.values() {
            let command = if def.render_command.is_empty() {
                None
            } else {
                Some(def.render_command.join("\u{1f}"))
            };
            store.execute(
                "INSERT INTO view_types(identifier, inline_prefix, aliases, counter_group,
                    view_subtype_ref, materializer_type, needs_external_render,
                    render_command, render_timeout_secs)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                &[
                    &def.identifier,
                    &def.inline_prefix,
                    &normalize_aliases(&def.aliases),
                    &def.counter_group,
                    &def.view_subtype_ref,
                    &def.materializer_type,
                    &def.needs_external_render,
                    &command,
                    &def.render_timeout_secs.map(|t| t as i64),
                ],
            )?;
        }

        for def in self.specifications.values() {
            store.execute(
                "INSERT INTO specification_types(identifier, extends, is_default)
                 VALUES(?1, ?2, ?3)",
                &[&def.identifier, &def.extends, &def.is_default],
            )?;
        }

        for def in self.datatypes.values() {
            store.execute(
                "INSERT INTO datatype_definitions(identifier, base) VALUES(?1, ?2)",
                &[&def.identifier, &def.base],
            )?;
        }
        Ok(())
    }
}

fn collect_toml_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<(), ModelError> {
    let entries = fs::read_dir(dir).map_err(|e| ModelError::ReadFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| ModelError::ReadFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_toml_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_model_loads() {
        let dir = TempDir::new().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        assert!(registry.object_type("HLR").is_some());
        assert!(registry.float_type("plantuml").is_some());
        assert_eq!(
            registry.default_object_type().map(|d| d.identifier.as_str()),
            Some("SECTION")
        );
        assert_eq!(
            registry
                .default_specification_type()
                .map(|d| d.identifier.as_str()),
            Some("document")
        );
    }

    #[test]
    fn project_overlay_replaces_by_identifier() {
        let dir = TempDir::new().unwrap();
        let types_dir = dir.path().join("model/types/objects");
        fs::create_dir_all(&types_dir).unwrap();
        fs::write(
            types_dir.join("hlr.toml"),
            r#"
            [[objects]]
            identifier = "HLR"
            long_name = "Project requirement"
            pid_prefix = "PR"
            pid_format = "%s-%04d"
            "#,
        )
        .unwrap();

        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        let hlr = registry.object_type("HLR").unwrap();
        assert_eq!(hlr.pid_prefix.as_deref(), Some("PR"));
        // Untouched defaults survive the overlay.
        assert!(registry.object_type("SECTION").is_some());
    }

    #[test]
    fn alias_resolution_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        assert_eq!(
            registry.resolve_float("PUML").map(|d| d.identifier.as_str()),
            Some("plantuml")
        );
        assert_eq!(
            registry.resolve_object("hlr").map(|d| d.identifier.as_str()),
            Some("HLR")
        );
    }

    #[test]
    fn selector_inheritance_and_ordering() {
        let dir = TempDir::new().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        // refines inherits @ from trace
        assert_eq!(registry.effective_selector("refines").as_deref(), Some("@"));
        let selectors = registry.selectors();
        let cite = selectors.iter().position(|s| s == "@cite").unwrap();
        let at = selectors.iter().position(|s| s == "@").unwrap();
        assert!(cite < at, "longer selectors must sort first");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = TypeRegistry::load(dir.path(), "missing-model").unwrap_err();
        assert!(matches!(err, ModelError::UnknownTemplate { .. }));
    }

    #[test]
    fn persist_writes_type_tables() {
        let dir = TempDir::new().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        let store = Store::open_in_memory().unwrap();
        registry.persist(&store).unwrap();

        let selector: Option<String> = store
            .query_one(
                "SELECT link_selector FROM relation_types WHERE identifier = 'refines'",
                &[],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(selector.as_deref(), Some("@"));

        let aliases: Option<String> = store
            .query_one(
                "SELECT aliases FROM float_types WHERE identifier = 'plantuml'",
                &[],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(aliases.as_deref(), Some(",puml,uml,"));
    }
}
