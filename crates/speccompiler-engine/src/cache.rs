//! Incremental build cache
//!
//! Dirtiness is decided per document before the pipeline runs; cache rows
//! (source hashes, include edges, output fingerprints) are staged in
//! memory and committed only after that document's EMIT has completed
//! successfully. A document whose pipeline fails keeps its previous
//! cache rows, so the next build treats it as dirty again. The commit is
//! per-document: other documents in the same invocation keep their own
//! outcomes.

use crate::include::{ExpandedSource, IncludeNode};
use anyhow::Result;
use speccompiler_phase_api::OutputTarget;
use speccompiler_store::Store;
use speccompiler_utils::hash::sha1_str;

/// Why a document is considered dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyReason {
    NeverBuilt,
    SourceChanged { path: String },
    IncludeChanged { path: String },
    OutputMissing { path: String },
    OutputUntracked { path: String },
    Forced,
}

/// Staged cache rows for one document, committed after successful emit.
#[derive(Debug, Clone)]
pub struct PendingCacheCommit {
    pub root_path: String,
    pub nodes: Vec<IncludeNode>,
}

impl PendingCacheCommit {
    #[must_use]
    pub fn new(root_path: String, expanded: &ExpandedSource) -> Self {
        Self {
            root_path,
            nodes: expanded.nodes.clone(),
        }
    }
}

/// Evaluate the dirtiness conditions for one document.
pub fn check_dirty(
    store: &Store,
    spec_id: &str,
    root_path: &str,
    expanded: &ExpandedSource,
    outputs: &[OutputTarget],
    force: bool,
) -> Result<Option<DirtyReason>> {
    if force {
        return Ok(Some(DirtyReason::Forced));
    }

    let stored_root: Option<String> = store.query_one(
        "SELECT sha1 FROM source_files WHERE path = ?1",
        &[&root_path],
        |row| row.get(0),
    )?;
    let Some(root_node) = expanded.nodes.first() else {
        return Ok(Some(DirtyReason::NeverBuilt));
    };
    match stored_root {
        None => return Ok(Some(DirtyReason::NeverBuilt)),
        Some(stored) if stored != root_node.sha1 => {
            return Ok(Some(DirtyReason::SourceChanged {
                path: root_path.to_string(),
            }));
        }
        Some(_) => {}
    }

    for node in &expanded.nodes {
        let node_path = node.path.display().to_string();
        let stored: Option<String> = store.query_one(
            "SELECT node_sha1 FROM build_graph WHERE root_path = ?1 AND node_path = ?2",
            &[&root_path, &node_path],
            |row| row.get(0),
        )?;
        match stored {
            None => {
                return Ok(Some(DirtyReason::IncludeChanged { path: node_path }));
            }
            Some(stored) if stored != node.sha1 => {
                return Ok(Some(DirtyReason::IncludeChanged { path: node_path }));
            }
            Some(_) => {}
        }
    }

    for output in outputs {
        let path_str = output.path.display().to_string();
        if !output.path.is_file() {
            return Ok(Some(DirtyReason::OutputMissing { path: path_str }));
        }
        let tracked: Option<String> = store.query_one(
            "SELECT pir_hash FROM output_cache WHERE spec_id = ?1 AND output_path = ?2",
            &[&spec_id, &path_str],
            |row| row.get(0),
        )?;
        if tracked.is_none() {
            return Ok(Some(DirtyReason::OutputUntracked { path: path_str }));
        }
    }
    Ok(None)
}

/// Write the staged source hashes and include edges for one document.
/// The caller wraps this in the same transaction as the output-cache
/// rows so the commit is atomic per document.
pub fn write_document_cache(store: &Store, pending: &PendingCacheCommit) -> Result<()> {
    for node in &pending.nodes {
        let path = node.path.display().to_string();
        store.execute(
            "INSERT INTO source_files(path, sha1) VALUES(?1, ?2)
             ON CONFLICT(path) DO UPDATE SET sha1 = excluded.sha1",
            &[&path, &node.sha1],
        )?;
    }
    store.execute(
        "DELETE FROM build_graph WHERE root_path = ?1",
        &[&pending.root_path],
    )?;
    for node in &pending.nodes {
        let path = node.path.display().to_string();
        store.execute(
            "INSERT INTO build_graph(root_path, node_path, node_sha1) VALUES(?1, ?2, ?3)",
            &[&pending.root_path, &path, &node.sha1],
        )?;
    }
    Ok(())
}

/// Fingerprint of the assembled pre-emit AST bytes.
#[must_use]
pub fn pir_hash(assembled_json: &str) -> String {
    sha1_str(assembled_json)
}

/// Upsert the output-cache row after a successful emit.
pub fn record_output(
    store: &Store,
    spec_id: &str,
    output_path: &str,
    pir_hash: &str,
    generated_at: &str,
) -> Result<()> {
    store.execute(
        "INSERT INTO output_cache(spec_id, output_path, pir_hash, generated_at)
         VALUES(?1, ?2, ?3, ?4)
         ON CONFLICT(spec_id, output_path) DO UPDATE
         SET pir_hash = excluded.pir_hash, generated_at = excluded.generated_at",
        &[&spec_id, &output_path, &pir_hash, &generated_at],
    )?;
    Ok(())
}
