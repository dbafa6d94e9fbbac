use tracing_subscriber::EnvFilter;

/// Installs a compact console subscriber filtered by `RUST_LOG` (default `info`).
pub(crate) fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}
