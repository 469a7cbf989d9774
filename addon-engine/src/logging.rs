//! Structured logging setup (SPEC_FULL.md §1.1).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Pretty,
    /// One JSON object per line, for production log shipping.
    Json,
}

/// Initialise the global `tracing` subscriber. Call once, at process start.
///
/// The filter defaults to `info` and honours `RUST_LOG` if set.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer().pretty().boxed()).init();
        }
        LogFormat::Json => {
            registry.with(tracing_subscriber::fmt::layer().json().boxed()).init();
        }
    }
}
