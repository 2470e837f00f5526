//! Type definition records
//!
//! These mirror the TOML declaration tables one-to-one. Optional fields
//! stay optional here; defaulting (counter groups, default types) happens
//! at the lookup layer so the stored rows reflect what was declared.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Attribute datatype vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Datatype {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "ENUM")]
    Enum,
    #[serde(rename = "XHTML")]
    Xhtml,
}

impl Datatype {
    /// Name as stored in the `datatype` columns.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Enum => "ENUM",
            Self::Xhtml => "XHTML",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datatype {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRING" => Ok(Self::String),
            "INTEGER" => Ok(Self::Integer),
            "REAL" => Ok(Self::Real),
            "BOOLEAN" => Ok(Self::Boolean),
            "DATE" => Ok(Self::Date),
            "ENUM" => Ok(Self::Enum),
            "XHTML" => Ok(Self::Xhtml),
            _ => Err(()),
        }
    }
}

/// Declared attribute of an object type.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeTypeDef {
    pub name: String,
    pub datatype: Datatype,
    #[serde(default)]
    pub min_occurs: u32,
    #[serde(default)]
    pub max_occurs: Option<u32>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

/// Object type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectTypeDef {
    pub identifier: String,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub is_composite: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub pid_prefix: Option<String>,
    #[serde(default)]
    pub pid_format: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeTypeDef>,
}

/// Float type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct FloatTypeDef {
    pub identifier: String,
    #[serde(default)]
    pub caption_format: Option<String>,
    #[serde(default)]
    pub counter_group: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub style_id: Option<String>,
    #[serde(default)]
    pub needs_external_render: bool,
    /// Renderer program and fixed arguments; input and output paths are
    /// appended by the orchestrator.
    #[serde(default)]
    pub render_command: Vec<String>,
    #[serde(default)]
    pub render_timeout_secs: Option<u64>,
    #[serde(default)]
    pub output_ext: Option<String>,
    #[serde(default)]
    pub source_ext: Option<String>,
}

impl FloatTypeDef {
    /// Counter group, defaulting to the type's own identifier.
    #[must_use]
    pub fn counter_group(&self) -> &str {
        self.counter_group.as_deref().unwrap_or(&self.identifier)
    }
}

/// Relation type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationTypeDef {
    pub identifier: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub link_selector: Option<String>,
    #[serde(default)]
    pub source_type_ref: Option<String>,
    #[serde(default)]
    pub target_type_ref: Option<String>,
    #[serde(default)]
    pub source_attribute: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// View type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewTypeDef {
    pub identifier: String,
    #[serde(default)]
    pub inline_prefix: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub counter_group: Option<String>,
    #[serde(default)]
    pub view_subtype_ref: Option<String>,
    /// One of `toc`, `lof`, `abbrev_def`, `abbrev_list`, `custom`.
    #[serde(default)]
    pub materializer_type: Option<String>,
    #[serde(default)]
    pub needs_external_render: bool,
    #[serde(default)]
    pub render_command: Vec<String>,
    #[serde(default)]
    pub render_timeout_secs: Option<u64>,
}

/// Specification type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecificationTypeDef {
    pub identifier: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Datatype declaration (names the base storage class).
#[derive(Debug, Clone, Deserialize)]
pub struct DatatypeDef {
    pub identifier: String,
    pub base: String,
}

/// One model TOML file; any combination of category tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub objects: Vec<ObjectTypeDef>,
    #[serde(default)]
    pub floats: Vec<FloatTypeDef>,
    #[serde(default)]
    pub relations: Vec<RelationTypeDef>,
    #[serde(default)]
    pub views: Vec<ViewTypeDef>,
    #[serde(default)]
    pub specifications: Vec<SpecificationTypeDef>,
    #[serde(default)]
    pub datatypes: Vec<DatatypeDef>,
}

/// Normalize an alias list to the comma-wrapped lowercase form stored in
/// the type tables, e.g. `,puml,uml,`. The wrapping commas make substring
/// queries against a single alias exact.
#[must_use]
pub fn normalize_aliases(aliases: &[String]) -> String {
    let mut out = String::from(",");
    for alias in aliases {
        let alias = alias.trim().to_lowercase();
        if alias.is_empty() {
            continue;
        }
        out.push_str(&alias);
        out.push(',');
    }
    out
}

/// Render a PID from a printf-style format with `%s` (prefix) and a
/// `%d`/`%0Nd` sequence field.
#[must_use]
pub fn format_pid(format: &str, prefix: &str, sequence: u32) -> String {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut width = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() {
                width.push(next);
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some('s') => out.push_str(prefix),
            Some('d') => {
                let width: usize = width.trim_start_matches('0').parse().unwrap_or(0);
                if width > 0 {
                    out.push_str(&format!("{sequence:0width$}"));
                } else {
                    out.push_str(&sequence.to_string());
                }
            }
            Some(other) => {
                out.push('%');
                out.push_str(&width);
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}
