//! Diagnostic logging for the command-line front end.
//!
//! Engine diagnostics go through `tracing`; transfer progress is rendered from
//! engine events and does not depend on the log level.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise INFO, or DEBUG with `--verbose`:
///
/// ```bash
/// RUST_LOG=xfer_engine=debug xfer copy --src a.exr --dst b.exr
/// RUST_LOG=xfer_engine::process=debug xfer session --manifest shots.toml
/// ```
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();
}
