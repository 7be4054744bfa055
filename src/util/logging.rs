use tracing_subscriber::{EnvFilter, fmt};

/// Initializes tracing. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    // A subscriber may already be installed, e.g. by a test harness
    let installed = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = installed {
        eprintln!("Tracing already initialized: {}", e);
    }
}
