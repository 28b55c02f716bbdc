use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Ambient plumbing, analogous
/// to how the teacher's binaries bootstrap logging before doing any real
/// work; safe to call more than once (subsequent calls are ignored).
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
