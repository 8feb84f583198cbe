//! Tracing initialisation shared by switchover nodes and their tests.

use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable enabling test log output.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static INIT_TEST_TRACING: Once = Once::new();

/// Output format of the node logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber of a node.
///
/// `log` records emitted by dependencies such as sqlx are forwarded into tracing.
pub fn init_tracing(service_name: &str, format: LogFormat) -> Result<(), TracingError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init()?,
    }

    tracing::info!(service = service_name, "tracing initialized");

    Ok(())
}

/// Installs a test subscriber once per process.
///
/// Output is only produced when `ENABLE_TRACING` is set, so passing tests stay quiet.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
