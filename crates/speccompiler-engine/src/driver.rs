//! Pipeline driver
//!
//! Owns the run: opens the store, loads and persists the type model,
//! expands includes, partitions documents into dirty and fresh sets,
//! registers the built-in handlers and executes the five phases. Dirty
//! documents run the full pipeline; fresh documents enter at EMIT with
//! `cached=true` contexts. Per-document failures are diagnostics, not
//! aborts; setup failures end the run before any phase.

use anyhow::{Context as _, Result};
use speccompiler_config::Config;
use speccompiler_doc::{Block, Inline, ast::decode_blocks, ast::encode_blocks, parse_markdown};
use speccompiler_model::TypeRegistry;
use speccompiler_phase_api::{Context, Diagnostics, Handler, Level, OutputTarget, Phase, Severity};
use speccompiler_runner::BatchRunner;
use speccompiler_store::{Store, fts, pivot};
use speccompiler_utils::paths::{ensure_dir_all, file_stem};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

use crate::analyzer::{analyze_relations, stale_reference_sweep};
use crate::cache::{PendingCacheCommit, check_dirty};
use crate::emit::{Postprocessor, WriterConfig, emit_document, reference_doc_path};
use crate::include::{ExpandedSource, expand_includes};
use crate::initializer::initialize_document;
use crate::linkrewrite::rewrite_links;
use crate::numberer::number_floats;
use crate::registry::HandlerRegistry;
use crate::render::{RendererRegistry, run_render_batch};
use crate::transformers::transform_internal_floats;
use crate::verify::verify_specification;
use crate::views::materialize_views;

/// Outcome of one build invocation.
#[derive(Debug)]
pub struct BuildSummary {
    pub built: Vec<String>,
    pub cached: Vec<String>,
    pub failed: Vec<String>,
    pub warn_count: usize,
    pub error_count: usize,
}

impl BuildSummary {
    /// True iff the run produced no error-level diagnostics and no
    /// failed documents.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error_count == 0 && self.failed.is_empty()
    }
}

/// The pipeline driver.
pub struct Driver {
    project_root: PathBuf,
    config: Config,
    force: bool,
}

/// Run `f` inside one store transaction, rolling back on error. Writing
/// handlers use this to keep their multi-row updates atomic.
fn in_transaction(store: &Store, f: impl FnOnce() -> Result<()>) -> Result<()> {
    store.begin()?;
    match f() {
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

/// Per-run state shared between handler closures.
struct DriverState {
    expanded: HashMap<String, ExpandedSource>,
    pending: HashMap<String, PendingCacheCommit>,
    failed: RefCell<BTreeSet<String>>,
    emitted: RefCell<BTreeSet<String>>,
}

impl Driver {
    #[must_use]
    pub fn new(project_root: PathBuf, config: Config, force: bool) -> Self {
        Self {
            project_root,
            config,
            force,
        }
    }

    /// Execute the full build.
    pub fn run(&self) -> Result<BuildSummary> {
        let build_dir = self.project_root.join(&self.config.output_dir);
        ensure_dir_all(&build_dir)?;
        let store = Store::open(&build_dir.join("specir.db"))
            .context("Failed to open the specification store")?;

        let model = Rc::new(
            TypeRegistry::load(&self.project_root, &self.config.template)
                .context("Failed to load the type model")?,
        );
        model.persist(&store).context("Failed to persist the type model")?;
        pivot::regenerate(&store)?;

        let mut diagnostics = Diagnostics::new(self.severity_overrides());

        let mut dirty_contexts: Vec<Context> = Vec::new();
        let mut cached_contexts: Vec<Context> = Vec::new();
        let mut state = DriverState {
            expanded: HashMap::new(),
            pending: HashMap::new(),
            failed: RefCell::new(BTreeSet::new()),
            emitted: RefCell::new(BTreeSet::new()),
        };

        let reference_doc = self.resolve_reference_doc(&store, &build_dir)?;

        for doc_file in &self.config.doc_files {
            let source_path = self.project_root.join(doc_file);
            let spec_id = file_stem(&source_path);
            let expanded = match expand_includes(&source_path) {
                Ok(expanded) => expanded,
                Err(e) => {
                    // Hard error for this document; cache rows stay as
                    // they were so the next run retries it.
                    diagnostics.emit(
                        Level::Error,
                        e.to_string(),
                        Some(&source_path.display().to_string()),
                        None,
                    );
                    state.failed.borrow_mut().insert(spec_id);
                    continue;
                }
            };

            let outputs: Vec<OutputTarget> = self
                .config
                .outputs_for(&self.project_root, &spec_id)
                .into_iter()
                .map(|(format, path)| OutputTarget { format, path })
                .collect();
            let root_path = source_path.display().to_string();
            let dirty_reason = check_dirty(
                &store,
                &spec_id,
                &root_path,
                &expanded,
                &outputs,
                self.force,
            )?;

            let mut ctx = match &dirty_reason {
                Some(reason) => {
                    debug!(spec_id = %spec_id, ?reason, "document is dirty");
                    let doc = parse_markdown(&expanded.text);
                    Context::dirty(spec_id.clone(), source_path.clone(), doc)
                }
                None => {
                    debug!(spec_id = %spec_id, "document is fresh");
                    Context::cached(spec_id.clone(), source_path.clone())
                }
            };
            ctx.build_dir = build_dir.clone();
            ctx.project_root = self.project_root.clone();
            ctx.template = self.config.template.clone();
            ctx.outputs = outputs;
            ctx.reference_doc = reference_doc.clone();
            ctx.docx = self.config.docx.clone();
            ctx.html5 = self.config.html5.clone();
            ctx.bibliography = self
                .config
                .bibliography
                .as_ref()
                .map(|p| self.project_root.join(p));
            ctx.csl = self.config.csl.as_ref().map(|p| self.project_root.join(p));
            ctx.validation = self.severity_overrides();

            if dirty_reason.is_some() {
                state
                    .pending
                    .insert(spec_id.clone(), PendingCacheCommit::new(root_path, &expanded));
                state.expanded.insert(spec_id.clone(), expanded);
                dirty_contexts.push(ctx);
            } else {
                cached_contexts.push(ctx);
            }
        }

        let renderers = Rc::new(RendererRegistry::from_model(&model));
        let state = Rc::new(state);
        let registry = self.build_handlers(
            Rc::clone(&model),
            Rc::clone(&renderers),
            Rc::clone(&state),
            build_dir.clone(),
        )?;

        for phase in [
            Phase::Initialize,
            Phase::Analyze,
            Phase::Transform,
            Phase::Verify,
        ] {
            registry.run_phase(phase, &store, &mut dirty_contexts, &mut diagnostics)?;
        }
        let cached_ids: Vec<String> =
            cached_contexts.iter().map(|c| c.spec_id.clone()).collect();
        let mut emit_contexts = dirty_contexts;
        emit_contexts.append(&mut cached_contexts);
        registry.run_phase(Phase::Emit, &store, &mut emit_contexts, &mut diagnostics)?;

        let failed: Vec<String> = state.failed.borrow().iter().cloned().collect();
        let built: Vec<String> = state
            .emitted
            .borrow()
            .iter()
            .filter(|id| !cached_ids.contains(id))
            .cloned()
            .collect();
        let summary = BuildSummary {
            built,
            cached: cached_ids,
            failed,
            warn_count: diagnostics.warn_count(),
            error_count: diagnostics.error_count(),
        };
        info!(
            built = summary.built.len(),
            cached = summary.cached.len(),
            failed = summary.failed.len(),
            warnings = summary.warn_count,
            errors = summary.error_count,
            "build finished"
        );
        Ok(summary)
    }

    fn severity_overrides(&self) -> BTreeMap<String, Severity> {
        self.config
            .validation
            .iter()
            .filter_map(|(key, value)| {
                value.parse::<Severity>().ok().map(|sev| (key.clone(), sev))
            })
            .collect()
    }

    fn resolve_reference_doc(
        &self,
        store: &Store,
        build_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some(docx) = &self.config.docx else {
            return Ok(None);
        };
        let Some(preset) = docx.get("reference_doc").and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        reference_doc_path(store, build_dir, &self.project_root.join(preset))
    }

    /// Register the built-in handlers.
    fn build_handlers(
        &self,
        model: Rc<TypeRegistry>,
        renderers: Rc<RendererRegistry>,
        state: Rc<DriverState>,
        build_dir: PathBuf,
    ) -> Result<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();

        {
            let model = Rc::clone(&model);
            let state = Rc::clone(&state);
            registry.register(Handler::new("initializer", &[]).on_initialize(
                move |store, contexts, diagnostics| {
                    for ctx in contexts.iter_mut().filter(|c| !c.cached) {
                        let Some(expanded) = state.expanded.get(&ctx.spec_id) else {
                            continue;
                        };
                        let diags = &mut *diagnostics;
                        in_transaction(store, || {
                            initialize_document(store, &model, expanded, ctx, diags)
                        })?;
                    }
                    Ok(())
                },
            ))?;
        }

        registry.register(Handler::new("stale-sweep", &[]).on_analyze(
            |store, _contexts, _diagnostics| {
                stale_reference_sweep(store)?;
                Ok(())
            },
        ))?;

        registry.register(
            Handler::new("relation-analyzer", &["stale-sweep"]).on_analyze(
                |store, _contexts, diagnostics| {
                    in_transaction(store, || analyze_relations(store, diagnostics))
                },
            ),
        )?;

        registry.register(Handler::new("float-numberer", &[]).on_transform(
            |store, contexts, _diagnostics| {
                in_transaction(store, || {
                    for ctx in contexts.iter().filter(|c| !c.cached) {
                        number_floats(store, ctx.spec_rowid)?;
                    }
                    Ok(())
                })
            },
        ))?;

        {
            let model = Rc::clone(&model);
            registry.register(
                Handler::new("internal-transformers", &["float-numberer"]).on_transform(
                    move |store, contexts, _diagnostics| {
                        in_transaction(store, || {
                            for ctx in contexts.iter().filter(|c| !c.cached) {
                                transform_internal_floats(store, &model, ctx.spec_rowid)?;
                            }
                            Ok(())
                        })
                    },
                ),
            )?;
        }

        {
            let model = Rc::clone(&model);
            registry.register(
                Handler::new("view-materializer", &["float-numberer"]).on_transform(
                    move |store, contexts, diagnostics| {
                        in_transaction(store, || {
                            for ctx in contexts.iter().filter(|c| !c.cached) {
                                materialize_views(store, &model, ctx.spec_rowid, diagnostics)?;
                            }
                            Ok(())
                        })
                    },
                ),
            )?;
        }

        {
            let renderers = Rc::clone(&renderers);
            let build_dir = build_dir.clone();
            registry.register(
                Handler::new("render-orchestrator", &["internal-transformers"]).on_transform(
                    move |store, _contexts, diagnostics| {
                        in_transaction(store, || {
                            run_render_batch(
                                store,
                                &renderers,
                                &build_dir,
                                &BatchRunner::new(),
                                diagnostics,
                            )
                        })
                    },
                ),
            )?;
        }

        registry.register(Handler::new("spec-header", &[]).on_transform(
            |store, contexts, _diagnostics| {
                in_transaction(store, || {
                    for ctx in contexts.iter().filter(|c| !c.cached) {
                        let title: Option<String> = store.query_one(
                            "SELECT long_name FROM specifications WHERE id = ?1",
                            &[&ctx.spec_rowid],
                            |row| row.get(0),
                        )?;
                        let Some(title) = title.filter(|t| !t.is_empty()) else {
                            continue;
                        };
                        let header = encode_blocks(&[Block::Header {
                            level: 1,
                            inlines: vec![Inline::str(title)],
                            line: 0,
                        }])?;
                        store.execute(
                            "UPDATE specifications SET header_ast = ?2 WHERE id = ?1",
                            &[&ctx.spec_rowid, &header],
                        )?;
                    }
                    Ok(())
                })
            },
        ))?;

        {
            let model = Rc::clone(&model);
            registry.register(
                Handler::new(
                    "link-rewriter",
                    &["float-numberer", "view-materializer", "render-orchestrator"],
                )
                .on_transform(move |store, contexts, _diagnostics| {
                    in_transaction(store, || {
                        for ctx in contexts.iter().filter(|c| !c.cached) {
                            rewrite_links(store, &model, ctx.spec_rowid, &ctx.spec_id)?;
                        }
                        Ok(())
                    })
                }),
            )?;
        }

        registry.register(Handler::new("verifier", &[]).on_verify(
            |store, contexts, diagnostics| {
                for ctx in contexts.iter().filter(|c| !c.cached) {
                    verify_specification(store, ctx.spec_rowid, diagnostics)?;
                }
                Ok(())
            },
        ))?;

        registry.register(Handler::new("fts-indexer", &[]).on_emit(
            |store, contexts, _diagnostics| {
                in_transaction(store, || {
                    for ctx in contexts.iter().filter(|c| !c.cached) {
                        fts::reindex_specification(store, ctx.spec_rowid, &ctx.spec_id)?;
                    }
                    Ok(())
                })
            },
        ))?;

        {
            let state = Rc::clone(&state);
            let writer = WriterConfig {
                program: self.config.writer.clone(),
            };
            let postprocessors: Rc<Vec<Box<dyn Postprocessor>>> = Rc::new(Vec::new());
            registry.register(Handler::new("emitter", &["fts-indexer"]).on_emit(
                move |store, contexts, diagnostics| {
                    // The assembler consults render hooks via a fresh
                    // minimal registry holding only the spec-header hook;
                    // phase handlers themselves are not re-entered.
                    let mut hooks = HandlerRegistry::new();
                    hooks.register(Handler::new("spec-header", &[]).on_render_specification(
                        |store, ctx| {
                            let header: Option<String> = store.query_one(
                                "SELECT header_ast FROM specifications WHERE identifier = ?1",
                                &[&ctx.spec_id],
                                |row| row.get(0),
                            )?;
                            match header {
                                Some(json) => Ok(Some(decode_blocks(&json)?)),
                                None => Ok(None),
                            }
                        },
                    ))?;

                    for ctx in contexts.iter() {
                        if state.failed.borrow().contains(&ctx.spec_id) {
                            continue;
                        }
                        let pending = state.pending.get(&ctx.spec_id);
                        let ok = emit_document(
                            store,
                            &hooks,
                            ctx,
                            &writer,
                            &postprocessors,
                            pending,
                            diagnostics,
                        )?;
                        if ok {
                            state.emitted.borrow_mut().insert(ctx.spec_id.clone());
                        } else {
                            state.failed.borrow_mut().insert(ctx.spec_id.clone());
                        }
                    }
                    Ok(())
                },
            ))?;
        }

        Ok(registry)
    }
}
