use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber.
/// Verbosity comes from `RUST_LOG` (e.g. `RUST_LOG=wind_receiver_lib=debug`).
/// Calling this twice is harmless; the second install is ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
