//! Tracing setup for binaries and demos embedding the service

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}
