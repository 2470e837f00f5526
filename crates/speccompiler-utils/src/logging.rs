//! Tracing initialization
//!
//! Structured logging for the pipeline itself. Validation diagnostics are a
//! separate NDJSON stream owned by the phase API; tracing carries progress
//! and timing only.

use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the tracing subscriber.
///
/// Honors `RUST_LOG` when set; otherwise `speccompiler=debug,info` in
/// verbose mode and `speccompiler=info,warn` by default. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("speccompiler=debug,info")
            } else {
                EnvFilter::try_new("speccompiler=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
