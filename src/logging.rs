use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "avatar_dialogue=info";

/// Installs the fmt subscriber. `RUST_LOG` wins over the default filter; a second call
/// is a no-op.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
