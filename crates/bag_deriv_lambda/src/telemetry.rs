use tracing_subscriber::EnvFilter;

/// JSON-line logging for the workers. `RUST_LOG` overrides the `info` default.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_target(false)
        .with_env_filter(filter)
        .try_init();
}
