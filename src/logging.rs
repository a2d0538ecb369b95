use crate::config::AppConfig;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const SERVICE_NAME: &str = "venue-settlement";

/// Filter used when `RUST_LOG` is unset. sqlx logs every statement at
/// `info`, which would drown out settlement events.
fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn")
}

/// Install the global subscriber. Keep the guard alive for the whole
/// process or buffered file output is lost.
///
/// `RUST_LOG` overrides `log_level`.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // Span fields (service, env) go on every line for log shippers
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    tracing::info!(
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        level = %config.log_level,
        rotation = %config.rotation,
        json = config.use_json,
        "Logging initialized"
    );

    guard
}

/// Root span for the daemon; every event inside carries service and env
pub fn service_span(env: &str) -> Span {
    tracing::info_span!("service", name = SERVICE_NAME, env = %env)
}
