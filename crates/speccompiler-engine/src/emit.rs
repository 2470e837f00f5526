//! EMIT: output writing and the deferred cache commit
//!
//! Per document: assemble the final AST, fingerprint it, write each
//! declared output (JSON directly; other formats through the external
//! writer subprocess), run postprocessors, then commit the document's
//! output-cache rows together with its staged source hashes and include
//! edges in one transaction. A failure anywhere leaves the document's
//! cache rows untouched so the next build re-treats it as dirty; other
//! documents are unaffected.

use anyhow::Result;
use chrono::Utc;
use speccompiler_phase_api::{Context, Diagnostics, Level};
use speccompiler_runner::{CommandSpec, NativeRunner, ProcessRunner};
use speccompiler_store::Store;
use speccompiler_utils::atomic_write::write_file_atomic;
use speccompiler_utils::hash::sha1_bytes;
use speccompiler_utils::paths::ensure_dir_all;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::assemble::{assemble_document, swap_ext_sentinel};
use crate::cache::{PendingCacheCommit, pir_hash, record_output, write_document_cache};
use crate::registry::HandlerRegistry;

const WRITER_TIMEOUT: Duration = Duration::from_secs(120);

/// External writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Writer program (default pandoc); invoked per non-JSON format.
    pub program: String,
}

/// Hook applied to a written artifact. ZIP-based formats get their
/// archive entries rewritten here; the default pipeline registers none.
pub trait Postprocessor {
    fn applies_to(&self, format: &str) -> bool;
    fn postprocess(&self, format: &str, output_path: &Path, ctx: &Context) -> Result<()>;
}

/// Emit one document. Returns false when any output failed; in that case
/// no cache rows were committed for this document.
pub fn emit_document(
    store: &Store,
    handlers: &HandlerRegistry,
    ctx: &Context,
    writer: &WriterConfig,
    postprocessors: &[Box<dyn Postprocessor>],
    pending: Option<&PendingCacheCommit>,
    diagnostics: &mut Diagnostics,
) -> Result<bool> {
    let blocks = assemble_document(store, handlers, ctx)?;
    let pir_json = serde_json::to_string(&blocks)?;
    let hash = pir_hash(&pir_json);

    let mut written: Vec<String> = Vec::new();
    for target in &ctx.outputs {
        let path_str = target.path.display().to_string();
        if ctx.cached && target.path.is_file() {
            let tracked: Option<String> = store.query_one(
                "SELECT pir_hash FROM output_cache WHERE spec_id = ?1 AND output_path = ?2",
                &[&ctx.spec_id, &path_str],
                |row| row.get(0),
            )?;
            if tracked.as_deref() == Some(hash.as_str()) {
                debug!(spec_id = %ctx.spec_id, path = %path_str, "output cache hit");
                continue;
            }
        }

        let result = if target.format == "json" {
            write_file_atomic(&target.path, &pir_json).map_err(|e| e.to_string())
        } else {
            run_writer(&blocks, &target.format, &target.path, ctx, writer)
        };
        if let Err(reason) = result {
            diagnostics.emit(
                Level::Error,
                format!(
                    "emit failed for '{}' ({}): {reason}",
                    ctx.spec_id, target.format
                ),
                Some(&ctx.source_path.display().to_string()),
                None,
            );
            return Ok(false);
        }

        for postprocessor in postprocessors {
            if postprocessor.applies_to(&target.format) {
                postprocessor.postprocess(&target.format, &target.path, ctx)?;
            }
        }
        written.push(path_str);
    }

    // Per-document deferred commit: output fingerprints plus the staged
    // build-graph rows land atomically, after everything succeeded.
    store.begin()?;
    let committed = (|| -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for path in &written {
            record_output(store, &ctx.spec_id, path, &hash, &now)?;
        }
        if let Some(pending) = pending {
            write_document_cache(store, pending)?;
        }
        Ok(())
    })();
    match committed {
        Ok(()) => {
            store.commit()?;
            info!(spec_id = %ctx.spec_id, outputs = written.len(), "document emitted");
            Ok(true)
        }
        Err(e) => {
            let _ = store.rollback();
            Err(e)
        }
    }
}

fn run_writer(
    blocks: &[speccompiler_doc::Block],
    format: &str,
    output_path: &Path,
    ctx: &Context,
    writer: &WriterConfig,
) -> Result<(), String> {
    let mut formatted = blocks.to_vec();
    swap_ext_sentinel(&mut formatted, format);
    let ast_json = serde_json::to_string(&formatted).map_err(|e| e.to_string())?;

    let tmp_dir = ctx.build_dir.join("tmp");
    ensure_dir_all(&tmp_dir).map_err(|e| e.to_string())?;
    let ast_path = tmp_dir.join(format!("{}.{format}.ast.json", ctx.spec_id));
    write_file_atomic(&ast_path, &ast_json).map_err(|e| e.to_string())?;

    if let Some(parent) = output_path.parent() {
        ensure_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let mut cmd = CommandSpec::new(&writer.program)
        .arg("--from=json")
        .arg(format!("--to={format}"))
        .arg("--output")
        .arg(output_path)
        .arg(&ast_path);
    if format == "docx" {
        if let Some(reference) = &ctx.reference_doc {
            cmd = cmd.arg("--reference-doc").arg(reference);
        }
    }
    if let Some(bibliography) = &ctx.bibliography {
        cmd = cmd.arg("--bibliography").arg(bibliography);
    }
    if let Some(csl) = &ctx.csl {
        cmd = cmd.arg("--csl").arg(csl);
    }

    let output = NativeRunner::new()
        .run(&cmd, WRITER_TIMEOUT)
        .map_err(|e| e.to_string())?;
    if !output.success() {
        return Err(format!(
            "writer exited with {:?}: {}",
            output.exit_code,
            output.stderr_string().lines().last().unwrap_or("")
        ));
    }
    Ok(())
}

/// Memoize the word-processor reference document by preset content hash.
///
/// The style preset named in the docx config is copied into the build
/// directory once per content hash; the store's key-value table
/// remembers the mapping across runs.
pub fn reference_doc_path(
    store: &Store,
    build_dir: &Path,
    preset: &Path,
) -> Result<Option<std::path::PathBuf>> {
    if !preset.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(preset)?;
    let hash = sha1_bytes(&bytes);
    let key = format!("reference-doc:{hash}");
    let target = build_dir.join("reference.docx");
    if store.kv_get(&key)?.is_none() || !target.is_file() {
        std::fs::copy(preset, &target)?;
        store.kv_put(&key, &target.display().to_string())?;
    }
    Ok(Some(target))
}
