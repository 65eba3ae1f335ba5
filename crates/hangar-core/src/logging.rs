use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info` for hangar crates and `warn`
/// elsewhere. Safe to call more than once (subsequent calls are no-ops),
/// so tests that exercise the daemon entrypoint don't panic.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,hangar_core=info,hangar_store=info,hangar_queue=info,hangar_daemon=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // Already-initialized is fine; tests init repeatedly.
    let _ = result;
}
