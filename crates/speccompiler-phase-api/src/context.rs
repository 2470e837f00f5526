//! Per-document execution context

use crate::diagnostics::Severity;
use serde_json::Value;
use speccompiler_doc::Document;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One declared output artifact for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Output format key (`json`, `markdown`, `html5`, `docx`)
    pub format: String,
    /// Resolved absolute output path
    pub path: PathBuf,
}

/// Per-document state threaded through every handler invocation.
///
/// The driver creates one `Context` per active document. Dirty documents
/// carry their parsed AST; documents entering only at EMIT carry
/// `doc: None` and `cached: true`.
#[derive(Debug)]
pub struct Context {
    /// Stable text id of the specification (source file stem)
    pub spec_id: String,
    /// Store rowid of the specification; 0 until INITIALIZE has run
    pub spec_rowid: i64,
    /// Root source path of the document
    pub source_path: PathBuf,
    /// Parsed, include-expanded AST (`None` for cached-only contexts)
    pub doc: Option<Document>,
    /// True iff the document skipped INITIALIZE/ANALYZE/TRANSFORM
    pub cached: bool,
    /// Build directory (holds the store, render outputs, reference doc)
    pub build_dir: PathBuf,
    /// Project root directory
    pub project_root: PathBuf,
    /// Model template name
    pub template: String,
    /// Declared outputs for this document
    pub outputs: Vec<OutputTarget>,
    /// Absolute path of the memoized word-processor reference document
    pub reference_doc: Option<PathBuf>,
    /// Per-format writer configuration
    pub docx: Option<Value>,
    /// Per-format writer configuration
    pub html5: Option<Value>,
    /// Bibliography database path handed to the writer
    pub bibliography: Option<PathBuf>,
    /// Citation style path handed to the writer
    pub csl: Option<PathBuf>,
    /// Severity overrides by diagnostic key
    pub validation: BTreeMap<String, Severity>,
    /// Monotone record counter used by the initializer
    pub file_seq: i64,
}

impl Context {
    /// Context for a dirty document about to run the full pipeline.
    #[must_use]
    pub fn dirty(spec_id: String, source_path: PathBuf, doc: Document) -> Self {
        Self {
            spec_id,
            spec_rowid: 0,
            source_path,
            doc: Some(doc),
            cached: false,
            build_dir: PathBuf::new(),
            project_root: PathBuf::new(),
            template: "default".to_string(),
            outputs: Vec::new(),
            reference_doc: None,
            docx: None,
            html5: None,
            bibliography: None,
            csl: None,
            validation: BTreeMap::new(),
            file_seq: 0,
        }
    }

    /// Context for a fresh document entering directly at EMIT.
    #[must_use]
    pub fn cached(spec_id: String, source_path: PathBuf) -> Self {
        Self {
            spec_id,
            spec_rowid: 0,
            source_path,
            doc: None,
            cached: true,
            build_dir: PathBuf::new(),
            project_root: PathBuf::new(),
            template: "default".to_string(),
            outputs: Vec::new(),
            reference_doc: None,
            docx: None,
            html5: None,
            bibliography: None,
            csl: None,
            validation: BTreeMap::new(),
            file_seq: 0,
        }
    }

    /// Allocate the next file-sequence value for this document.
    pub fn next_file_seq(&mut self) -> i64 {
        self.file_seq += 1;
        self.file_seq
    }
}
