//! Phase, handler, context and diagnostics contract
//!
//! The shared surface between the pipeline driver and handler
//! implementations: the five-phase vocabulary, the handler value record
//! with its optional per-phase callbacks, the per-document [`Context`],
//! and the [`Diagnostics`] sink with its severity policy map. Kept as a
//! thin crate so the engine and any out-of-tree handlers agree on types
//! without circular dependencies.

pub mod context;
pub mod diagnostics;
pub mod handler;
pub mod phase;

pub use context::{Context, OutputTarget};
pub use diagnostics::{DEFAULT_POLICIES, Diagnostic, Diagnostics, Level, Severity};
pub use handler::{
    BlockRenderCallback, Handler, InlineRenderCallback, PhaseCallback, SpecRenderCallback,
};
pub use phase::Phase;
