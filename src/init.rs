// Logging/tracing setup

use medallion_config::{LogConfig, LogFormat};

/// Initialize tracing/logging from the `[log]` config section.
///
/// `RUST_LOG` takes precedence over the configured level when set. Logs go
/// to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(config: &LogConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already set (idempotent)
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}
