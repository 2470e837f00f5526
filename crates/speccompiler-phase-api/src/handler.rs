//! Handler value records
//!
//! A handler is a value with a required unique name, a prerequisite list
//! and an optional callback per phase. The scheduler selects, per phase,
//! the handlers that implement that phase's callback and runs them in
//! prerequisite topological order. Render callbacks are consulted by the
//! assembler while it walks the final document tree.

use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::phase::Phase;
use anyhow::Result;
use speccompiler_doc::{Block, Inline};
use speccompiler_store::Store;

/// Per-phase callback: `(store, contexts, diagnostics)`.
pub type PhaseCallback =
    Box<dyn Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()>>;

/// Render hook over a block node during assembly.
pub type BlockRenderCallback = Box<dyn Fn(&Store, &Context, &mut Block) -> Result<()>>;

/// Render hook over an inline node during assembly.
pub type InlineRenderCallback = Box<dyn Fn(&Store, &Context, &mut Inline) -> Result<()>>;

/// Render hook producing a document's specification header blocks.
pub type SpecRenderCallback =
    Box<dyn Fn(&Store, &Context) -> Result<Option<Vec<Block>>>>;

/// A registered pipeline plug-in.
pub struct Handler {
    pub name: String,
    pub prerequisites: Vec<String>,
    pub on_initialize: Option<PhaseCallback>,
    pub on_analyze: Option<PhaseCallback>,
    pub on_transform: Option<PhaseCallback>,
    pub on_verify: Option<PhaseCallback>,
    pub on_emit: Option<PhaseCallback>,
    pub on_render_spec_object: Option<BlockRenderCallback>,
    pub on_render_code_block: Option<BlockRenderCallback>,
    pub on_render_code: Option<InlineRenderCallback>,
    pub on_render_specification: Option<SpecRenderCallback>,
}

impl Handler {
    /// New handler with the given name and prerequisite names.
    #[must_use]
    pub fn new(name: impl Into<String>, prerequisites: &[&str]) -> Self {
        Self {
            name: name.into(),
            prerequisites: prerequisites.iter().map(|s| (*s).to_string()).collect(),
            on_initialize: None,
            on_analyze: None,
            on_transform: None,
            on_verify: None,
            on_emit: None,
            on_render_spec_object: None,
            on_render_code_block: None,
            on_render_code: None,
            on_render_specification: None,
        }
    }

    #[must_use]
    pub fn on_initialize(
        mut self,
        f: impl Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()> + 'static,
    ) -> Self {
        self.on_initialize = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_analyze(
        mut self,
        f: impl Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()> + 'static,
    ) -> Self {
        self.on_analyze = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_transform(
        mut self,
        f: impl Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()> + 'static,
    ) -> Self {
        self.on_transform = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_verify(
        mut self,
        f: impl Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()> + 'static,
    ) -> Self {
        self.on_verify = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_emit(
        mut self,
        f: impl Fn(&Store, &mut [Context], &mut Diagnostics) -> Result<()> + 'static,
    ) -> Self {
        self.on_emit = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_render_specification(
        mut self,
        f: impl Fn(&Store, &Context) -> Result<Option<Vec<Block>>> + 'static,
    ) -> Self {
        self.on_render_specification = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_render_code_block(
        mut self,
        f: impl Fn(&Store, &Context, &mut Block) -> Result<()> + 'static,
    ) -> Self {
        self.on_render_code_block = Some(Box::new(f));
        self
    }

    /// The callback this handler contributes to `phase`, if any.
    #[must_use]
    pub fn callback(&self, phase: Phase) -> Option<&PhaseCallback> {
        match phase {
            Phase::Initialize => self.on_initialize.as_ref(),
            Phase::Analyze => self.on_analyze.as_ref(),
            Phase::Transform => self.on_transform.as_ref(),
            Phase::Verify => self.on_verify.as_ref(),
            Phase::Emit => self.on_emit.as_ref(),
        }
    }

    /// Whether this handler participates in `phase`.
    #[must_use]
    pub fn implements(&self, phase: Phase) -> bool {
        self.callback(phase).is_some()
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field(
                "phases",
                &Phase::ALL
                    .iter()
                    .filter(|p| self.implements(**p))
                    .map(|p| p.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
