//! TRANSFORM: external render orchestration
//!
//! Float and view types marked `needs_external_render` delegate to
//! subprocess renderers. The orchestrator collects every pending item,
//! asks the type's renderer to prepare a task descriptor, skips tasks
//! whose hash-named output already exists on disk, deduplicates identical
//! content within the batch, and executes the rest in parallel with
//! bounded concurrency. Results are dispatched back to the renderer's
//! `handle_result` on the driver's thread after the whole batch has
//! terminated. Failures are warnings; the row keeps a null
//! `resolved_ast` and emission degrades to a placeholder.

use anyhow::Result;
use speccompiler_doc::ast::encode_blocks;
use speccompiler_doc::{Block, Inline};
use speccompiler_model::TypeRegistry;
use speccompiler_phase_api::Diagnostics;
use speccompiler_runner::{BatchRunner, BatchTask, CommandSpec};
use speccompiler_store::Store;
use speccompiler_utils::paths::ensure_dir_all;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// What kind of row a render item updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Float,
    View,
}

/// One pending externally rendered row.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub id: i64,
    pub kind: RenderKind,
    pub type_ref: String,
    pub content: String,
    pub content_sha: String,
}

/// A prepared task descriptor.
#[derive(Debug)]
pub struct RenderTask {
    pub cmd: CommandSpec,
    pub timeout: Duration,
    /// Expected binary artifact; `None` for textual (stdout) renderers.
    pub output_path: Option<PathBuf>,
    /// Artifact path relative to the build dir, referenced from the
    /// resolved AST.
    pub output_rel: Option<String>,
    pub item: RenderItem,
}

/// Renderer callback bundle registered per type identifier.
pub trait Renderer {
    /// Build a task for the item, or `None` to skip it.
    fn prepare_task(
        &self,
        item: &RenderItem,
        build_dir: &Path,
        store: &Store,
    ) -> Result<Option<RenderTask>>;

    /// Consume a completed (or cached) task and update the owning row.
    fn handle_result(
        &self,
        task: &RenderTask,
        success: bool,
        stdout: &str,
        stderr: &str,
        store: &Store,
    ) -> Result<()>;
}

/// Registry mapping type identifiers to renderer bundles. Owned by the
/// driver and handed to the orchestrator; nothing global.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: BTreeMap<String, Box<dyn Renderer>>,
}

impl RendererRegistry {
    /// Build renderers for every externally rendered type in the model.
    #[must_use]
    pub fn from_model(model: &TypeRegistry) -> Self {
        let mut registry = Self::default();
        for float_type in model.float_types() {
            if !float_type.needs_external_render || float_type.render_command.is_empty() {
                continue;
            }
            let subdir = if float_type.identifier == "chart" {
                "charts"
            } else {
                "diagrams"
            };
            registry.register(
                &float_type.identifier,
                Box::new(ArtifactRenderer {
                    command: float_type.render_command.clone(),
                    timeout: Duration::from_secs(float_type.render_timeout_secs.unwrap_or(30)),
                    source_ext: float_type
                        .source_ext
                        .clone()
                        .unwrap_or_else(|| "txt".to_string()),
                    output_ext: float_type
                        .output_ext
                        .clone()
                        .unwrap_or_else(|| "png".to_string()),
                    subdir: subdir.to_string(),
                }),
            );
        }
        for view_type in model.view_types() {
            if !view_type.needs_external_render || view_type.render_command.is_empty() {
                continue;
            }
            registry.register(
                &view_type.identifier,
                Box::new(TextRenderer {
                    command: view_type.render_command.clone(),
                    timeout: Duration::from_secs(view_type.render_timeout_secs.unwrap_or(10)),
                }),
            );
        }
        registry
    }

    pub fn register(&mut self, type_ref: &str, renderer: Box<dyn Renderer>) {
        self.renderers.insert(type_ref.to_string(), renderer);
    }

    #[must_use]
    pub fn get(&self, type_ref: &str) -> Option<&dyn Renderer> {
        self.renderers.get(type_ref).map(|r| &**r)
    }
}

/// Renderer producing a binary artifact file (diagrams, charts).
///
/// The input is written to `{subdir}/{sha}.{source_ext}`; the command is
/// invoked as `{command...} {input} {output}`. The content hash in the
/// output filename is the cache key: changed content produces a new path
/// and re-renders automatically.
struct ArtifactRenderer {
    command: Vec<String>,
    timeout: Duration,
    source_ext: String,
    output_ext: String,
    subdir: String,
}

impl Renderer for ArtifactRenderer {
    fn prepare_task(
        &self,
        item: &RenderItem,
        build_dir: &Path,
        _store: &Store,
    ) -> Result<Option<RenderTask>> {
        let dir = build_dir.join(&self.subdir);
        ensure_dir_all(&dir)?;
        let input = dir.join(format!("{}.{}", item.content_sha, self.source_ext));
        let output_rel = format!("{}/{}.{}", self.subdir, item.content_sha, self.output_ext);
        let output = build_dir.join(&output_rel);
        fs::write(&input, &item.content)?;

        let Some((program, args)) = self.command.split_first() else {
            return Ok(None);
        };
        let cmd = CommandSpec::new(program)
            .args(args.iter().map(String::as_str))
            .arg(&input)
            .arg(&output)
            .cwd(build_dir);
        Ok(Some(RenderTask {
            cmd,
            timeout: self.timeout,
            output_path: Some(output),
            output_rel: Some(output_rel),
            item: item.clone(),
        }))
    }

    fn handle_result(
        &self,
        task: &RenderTask,
        success: bool,
        _stdout: &str,
        _stderr: &str,
        store: &Store,
    ) -> Result<()> {
        if !success {
            return Ok(());
        }
        let Some(output_rel) = &task.output_rel else {
            return Ok(());
        };
        let resolved = encode_blocks(&[Block::Para {
            inlines: vec![Inline::Image {
                inlines: Vec::new(),
                target: output_rel.clone(),
                title: String::new(),
            }],
            line: 0,
        }])?;
        update_resolved_ast(store, &task.item, &resolved)
    }
}

/// Renderer whose output is textual, read from stdout (inline math).
struct TextRenderer {
    command: Vec<String>,
    timeout: Duration,
}

impl Renderer for TextRenderer {
    fn prepare_task(
        &self,
        item: &RenderItem,
        build_dir: &Path,
        _store: &Store,
    ) -> Result<Option<RenderTask>> {
        let dir = build_dir.join("math");
        ensure_dir_all(&dir)?;
        let input = dir.join(format!("{}.txt", item.content_sha));
        fs::write(&input, &item.content)?;

        let Some((program, args)) = self.command.split_first() else {
            return Ok(None);
        };
        let cmd = CommandSpec::new(program)
            .args(args.iter().map(String::as_str))
            .arg(&input)
            .cwd(build_dir);
        Ok(Some(RenderTask {
            cmd,
            timeout: self.timeout,
            output_path: None,
            output_rel: None,
            item: item.clone(),
        }))
    }

    fn handle_result(
        &self,
        task: &RenderTask,
        success: bool,
        stdout: &str,
        _stderr: &str,
        store: &Store,
    ) -> Result<()> {
        if !success {
            return Ok(());
        }
        let resolved = encode_blocks(&[Block::Plain {
            inlines: vec![Inline::RawInline {
                format: "html".to_string(),
                text: stdout.trim_end().to_string(),
            }],
        }])?;
        update_resolved_ast(store, &task.item, &resolved)
    }
}

fn update_resolved_ast(store: &Store, item: &RenderItem, resolved: &str) -> Result<()> {
    let sql = match item.kind {
        RenderKind::Float => "UPDATE spec_floats SET resolved_ast = ?2 WHERE id = ?1",
        RenderKind::View => "UPDATE spec_views SET resolved_ast = ?2 WHERE id = ?1",
    };
    store.execute(sql, &[&item.id, &resolved])?;
    Ok(())
}

/// Run the full render batch for the store.
pub fn run_render_batch(
    store: &Store,
    renderers: &RendererRegistry,
    build_dir: &Path,
    runner: &BatchRunner,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut items: Vec<RenderItem> = store.query_all(
        "SELECT f.id, f.type_ref, f.raw_content, f.content_sha
         FROM spec_floats f
         JOIN float_types ft ON ft.identifier = f.type_ref
         WHERE ft.needs_external_render = 1 AND f.resolved_ast IS NULL
         ORDER BY f.id",
        &[],
        |row| {
            Ok(RenderItem {
                id: row.get(0)?,
                kind: RenderKind::Float,
                type_ref: row.get(1)?,
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                content_sha: row.get(3)?,
            })
        },
    )?;
    items.extend(store.query_all(
        "SELECT v.id, v.type_ref, v.raw_content, v.content_sha
         FROM spec_views v
         JOIN view_types vt ON vt.identifier = v.type_ref
         WHERE vt.needs_external_render = 1 AND v.resolved_ast IS NULL
         ORDER BY v.id",
        &[],
        |row| {
            Ok(RenderItem {
                id: row.get(0)?,
                kind: RenderKind::View,
                type_ref: row.get(1)?,
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                content_sha: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        },
    )?);

    let mut pending: Vec<(RenderTask, &dyn Renderer)> = Vec::new();
    for item in items {
        let Some(renderer) = renderers.get(&item.type_ref) else {
            continue;
        };
        if let Some(task) = renderer.prepare_task(&item, build_dir, store)? {
            pending.push((task, renderer));
        }
    }

    // File-based cache plus in-batch dedup by output path: an artifact
    // that already exists, or that an earlier task in this batch will
    // produce, is not rendered again.
    let mut to_run: Vec<(RenderTask, &dyn Renderer)> = Vec::new();
    let mut deferred: Vec<(RenderTask, &dyn Renderer)> = Vec::new();
    let mut claimed: BTreeSet<PathBuf> = BTreeSet::new();
    for (task, renderer) in pending {
        match &task.output_path {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "render output cached on disk");
                renderer.handle_result(&task, true, "", "", store)?;
            }
            Some(path) if claimed.contains(path) => deferred.push((task, renderer)),
            Some(path) => {
                claimed.insert(path.clone());
                to_run.push((task, renderer));
            }
            None => to_run.push((task, renderer)),
        }
    }

    let batch: Vec<BatchTask> = to_run
        .iter()
        .map(|(task, _)| BatchTask {
            cmd: task.cmd.clone(),
            timeout: task.timeout,
        })
        .collect();
    let outcomes = runner.run_all(batch);

    for outcome in outcomes {
        let (task, renderer) = &to_run[outcome.index];
        let (success, stdout, stderr) = match outcome.result {
            Ok(output) => (
                output.success(),
                output.stdout_string(),
                output.stderr_string(),
            ),
            Err(e) => (false, String::new(), e.to_string()),
        };
        if !success {
            warn!(type_ref = %task.item.type_ref, "external render failed");
            diagnostics.report(
                "float_render_failure",
                format!(
                    "external render failed for {} '{}': {}",
                    task.item.type_ref,
                    task.item.content_sha,
                    stderr.lines().last().unwrap_or("no stderr")
                ),
                None,
                None,
            );
        }
        renderer.handle_result(task, success, &stdout, &stderr, store)?;
    }

    // Duplicates resolve against whatever the batch produced.
    for (task, renderer) in deferred {
        let success = task.output_path.as_deref().is_some_and(Path::is_file);
        renderer.handle_result(&task, success, "", "", store)?;
    }
    Ok(())
}
