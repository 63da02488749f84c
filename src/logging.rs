use tracing_subscriber::EnvFilter;

/// Diagnostic logging to stderr, kept quiet unless `RUST_LOG` asks for more.
/// Progress output goes through the engine events, not through here.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
