//! Project configuration
//!
//! `speccompiler.toml` at the project root names the input documents, the
//! model template, the output directory and the declared outputs per
//! document. Validation collects every problem before failing so a broken
//! config is reported in one pass.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Invalid configuration file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("Configuration validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

/// Output formats the emitter knows how to produce.
pub const KNOWN_FORMATS: &[&str] = &["json", "markdown", "html5", "docx"];

const KNOWN_SEVERITIES: &[&str] = &["ignore", "warn", "error"];

/// `[project]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub code: String,
    pub name: String,
}

/// One `[[outputs]]` declaration. `path` may use `{spec_id}` templating
/// and is resolved relative to `output_dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputDecl {
    pub format: String,
    pub path: String,
}

/// The full project configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project: ProjectInfo,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub doc_files: Vec<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub docx: Option<Value>,
    #[serde(default)]
    pub html5: Option<Value>,
    #[serde(default)]
    pub bibliography: Option<PathBuf>,
    #[serde(default)]
    pub csl: Option<PathBuf>,
    /// External writer program (defaults to pandoc).
    #[serde(default = "default_writer")]
    pub writer: String,
    /// Severity overrides: diagnostic key -> ignore|warn|error.
    #[serde(default)]
    pub validation: BTreeMap<String, String>,
}

fn default_template() -> String {
    "default".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_writer() -> String {
    "pandoc".to_string()
}

impl Config {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::InvalidFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::InvalidFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.project.code.trim().is_empty() {
            errors.push("project.code must not be empty".to_string());
        }
        if self.project.name.trim().is_empty() {
            errors.push("project.name must not be empty".to_string());
        }
        for output in &self.outputs {
            if !KNOWN_FORMATS.contains(&output.format.as_str()) {
                errors.push(format!(
                    "unknown output format '{}' (expected one of: {})",
                    output.format,
                    KNOWN_FORMATS.join(", ")
                ));
            }
            if self.doc_files.len() > 1 && !output.path.contains("{spec_id}") {
                errors.push(format!(
                    "output path '{}' needs {{spec_id}} templating with multiple doc_files",
                    output.path
                ));
            }
        }
        for (key, severity) in &self.validation {
            if !KNOWN_SEVERITIES.contains(&severity.as_str()) {
                errors.push(format!(
                    "validation.{key} has unknown severity '{severity}'"
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Resolve this document's output paths under `output_dir`.
    #[must_use]
    pub fn outputs_for(&self, project_root: &Path, spec_id: &str) -> Vec<(String, PathBuf)> {
        let base = project_root.join(&self.output_dir);
        self.outputs
            .iter()
            .map(|decl| {
                let rel = decl.path.replace("{spec_id}", spec_id);
                (decl.format.clone(), base.join(rel))
            })
            .collect()
    }
}
