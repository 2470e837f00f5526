//! Syntactic overlay recognition
//!
//! The initializer recognizes a thin authored syntax on top of plain
//! Markdown: typed headings, float fences, attribute block-quotes and
//! view prefixes. The patterns live here so the initializer and tests
//! share one definition.

use once_cell::sync::Lazy;
use regex::Regex;

/// Parsed `type: Title @PID` heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingParts {
    pub type_name: Option<String>,
    pub title: String,
    pub pid: Option<String>,
}

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:([A-Za-z][A-Za-z0-9_ -]*?)\s*:\s*)?(.*?)(?:\s+@([A-Za-z0-9][A-Za-z0-9_.-]*))?\s*$")
        .unwrap()
});

/// Split a heading title into its optional type prefix, title text and
/// optional authored PID. The type prefix is only a candidate; whether it
/// names a registered type is the caller's decision.
#[must_use]
pub fn parse_heading(text: &str) -> HeadingParts {
    let Some(caps) = HEADING_RE.captures(text) else {
        return HeadingParts {
            type_name: None,
            title: text.trim().to_string(),
            pid: None,
        };
    };
    HeadingParts {
        type_name: caps.get(1).map(|m| m.as_str().trim().to_string()),
        title: caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        pid: caps.get(3).map(|m| m.as_str().to_string()),
    }
}

/// Parsed float fence info string `type[.lang]:label{key="val" ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatInfo {
    pub type_name: String,
    pub lang: Option<String>,
    pub label: String,
    pub attributes: Vec<(String, String)>,
}

static FLOAT_INFO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*)(?:\.([A-Za-z0-9_-]+))?:([A-Za-z0-9_.-]*)\s*(\{.*\})?\s*$")
        .unwrap()
});

static FENCE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).unwrap());

/// Parse a fenced code block info string as a float declaration.
///
/// Returns `None` when the info string does not follow the float form;
/// such fences stay in the owning object's prose.
#[must_use]
pub fn parse_float_info(info: &str) -> Option<FloatInfo> {
    let caps = FLOAT_INFO_RE.captures(info.trim())?;
    let attributes = caps.get(4).map_or_else(Vec::new, |attrs| {
        FENCE_ATTR_RE
            .captures_iter(attrs.as_str())
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect()
    });
    Some(FloatInfo {
        type_name: caps[1].to_string(),
        lang: caps.get(2).map(|m| m.as_str().to_string()),
        label: caps[3].to_string(),
        attributes,
    })
}

/// Parsed attribute block-quote opening line `key: value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeLine {
    pub key: String,
    pub value: String,
}

static ATTRIBUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)\s*:\s*(.*)$").unwrap());

/// Parse the first line of an attribute block-quote.
#[must_use]
pub fn parse_attribute_line(line: &str) -> Option<AttributeLine> {
    let caps = ATTRIBUTE_RE.captures(line.trim())?;
    Some(AttributeLine {
        key: caps[1].to_string(),
        value: caps[2].trim().to_string(),
    })
}

/// Parsed inline view `prefix: content` or `prefix:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineView {
    pub prefix: String,
    pub content: String,
}

static INLINE_VIEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*):\s*(.*)$").unwrap());

/// Parse inline code as a view request. The prefix is only a candidate;
/// the caller checks it against registered view types.
#[must_use]
pub fn parse_inline_view(code: &str) -> Option<InlineView> {
    let caps = INLINE_VIEW_RE.captures(code.trim())?;
    Some(InlineView {
        prefix: caps[1].to_string(),
        content: caps[2].trim().to_string(),
    })
}
