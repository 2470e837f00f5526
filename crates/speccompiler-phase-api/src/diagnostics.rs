//! Validation diagnostics
//!
//! Diagnostics are newline-delimited JSON records on stderr, separate from
//! the tracing stream. Each policied record carries a `key` matching a
//! declared validation policy; the effective severity is the configured
//! override when present, else the key's default. `ignore` suppresses the
//! record entirely.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Configurable severity for a policy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ignore,
    Warn,
    Error,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Record level on the diagnostic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Info => f.write_str("info"),
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Default severity per policy key.
pub const DEFAULT_POLICIES: &[(&str, Severity)] = &[
    ("spec_missing_required", Severity::Error),
    ("object_missing_required", Severity::Error),
    ("object_cardinality_over", Severity::Error),
    ("object_cast_failures", Severity::Error),
    ("object_invalid_enum", Severity::Error),
    ("object_invalid_date", Severity::Error),
    ("object_bounds_violation", Severity::Error),
    ("object_duplicate_pid", Severity::Error),
    ("float_orphan", Severity::Error),
    ("float_duplicate_label", Severity::Error),
    ("float_render_failure", Severity::Warn),
    ("relation_unresolved", Severity::Error),
    ("relation_dangling", Severity::Error),
    ("relation_ambiguous", Severity::Warn),
    ("view_materialization_failure", Severity::Warn),
];

/// Diagnostic sink shared by every handler invocation.
#[derive(Debug)]
pub struct Diagnostics {
    overrides: BTreeMap<String, Severity>,
    records: Vec<Diagnostic>,
    warn_count: usize,
    error_count: usize,
    write_stderr: bool,
}

impl Diagnostics {
    /// Sink with the given severity overrides, writing NDJSON to stderr.
    #[must_use]
    pub fn new(overrides: BTreeMap<String, Severity>) -> Self {
        Self {
            overrides,
            records: Vec::new(),
            warn_count: 0,
            error_count: 0,
            write_stderr: true,
        }
    }

    /// Silent sink for tests: records are collected but not printed.
    #[must_use]
    pub fn collecting(overrides: BTreeMap<String, Severity>) -> Self {
        Self {
            overrides,
            records: Vec::new(),
            warn_count: 0,
            error_count: 0,
            write_stderr: false,
        }
    }

    fn default_severity(key: &str) -> Severity {
        DEFAULT_POLICIES
            .iter()
            .find(|(k, _)| *k == key)
            .map_or(Severity::Warn, |(_, sev)| *sev)
    }

    /// Effective severity for a policy key.
    #[must_use]
    pub fn severity_of(&self, key: &str) -> Severity {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or_else(|| Self::default_severity(key))
    }

    /// Report a policied validation finding.
    pub fn report(
        &mut self,
        key: &str,
        message: impl Into<String>,
        file: Option<&str>,
        line: Option<u32>,
    ) {
        let level = match self.severity_of(key) {
            Severity::Ignore => return,
            Severity::Warn => Level::Warn,
            Severity::Error => Level::Error,
        };
        self.push(Diagnostic {
            level,
            message: message.into(),
            file: file.map(str::to_string),
            line,
            key: Some(key.to_string()),
        });
    }

    /// Emit an unpolicied record at the given level.
    pub fn emit(
        &mut self,
        level: Level,
        message: impl Into<String>,
        file: Option<&str>,
        line: Option<u32>,
    ) {
        self.push(Diagnostic {
            level,
            message: message.into(),
            file: file.map(str::to_string),
            line,
            key: None,
        });
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            Level::Warn => self.warn_count += 1,
            Level::Error => self.error_count += 1,
            Level::Debug | Level::Info => {}
        }
        if self.write_stderr {
            if let Ok(json) = serde_json::to_string(&diagnostic) {
                let _ = writeln!(std::io::stderr(), "{json}");
            }
        }
        self.records.push(diagnostic);
    }

    #[must_use]
    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    #[must_use]
    pub fn warn_count(&self) -> usize {
        self.warn_count
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// True iff any error-level record was emitted.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        diags.report("relation_unresolved", "no target", Some("a.md"), Some(12));
        diags.report("relation_ambiguous", "two hits", None, None);
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warn_count(), 1);
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut overrides = BTreeMap::new();
        overrides.insert("relation_unresolved".to_string(), Severity::Ignore);
        overrides.insert("relation_ambiguous".to_string(), Severity::Error);
        let mut diags = Diagnostics::collecting(overrides);
        diags.report("relation_unresolved", "suppressed", None, None);
        diags.report("relation_ambiguous", "promoted", None, None);
        assert_eq!(diags.records().len(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn unknown_keys_default_to_warn() {
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        diags.report("not_a_declared_key", "odd", None, None);
        assert_eq!(diags.warn_count(), 1);
    }

    #[test]
    fn records_serialize_with_optional_fields() {
        let diagnostic = Diagnostic {
            level: Level::Error,
            message: "Include file not found".to_string(),
            file: Some("a.md".to_string()),
            line: Some(3),
            key: None,
        };
        let json = serde_json::to_string(&diagnostic).unwrap();
        assert!(json.contains("\"level\":\"error\""));
        assert!(json.contains("\"line\":3"));
        assert!(!json.contains("\"key\""));
    }

    #[test]
    fn severity_parses() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warn);
        assert!("loud".parse::<Severity>().is_err());
    }
}
