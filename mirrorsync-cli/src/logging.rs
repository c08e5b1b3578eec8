//! tracing-subscriber setup. Output goes to stderr, which detached listeners
//! and workers have redirected into the configured log file.

use tracing_subscriber::{fmt, EnvFilter};

/// Level used when `RUST_LOG` is unset.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
