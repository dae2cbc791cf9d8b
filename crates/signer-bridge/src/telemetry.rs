//! Tracing subscriber setup.
//!
//! Environment variables:
//! - `RUST_LOG` - Log filter directive, overrides the configured filter
//! - `TEST_LOG` - If set, enables logs in test mode

use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::LogFormat;

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber.
pub fn init(default_filter: &str, format: LogFormat) -> Result<(), SetGlobalDefaultError> {
    let env_filter = env_filter(default_filter);
    match format {
        LogFormat::Json => {
            let formatting_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            let subscriber = Registry::default().with(env_filter).with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Pretty => {
            let formatting_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr);
            let subscriber = Registry::default().with(env_filter).with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
    }
}

/// Initialize logging for tests.
///
/// Logs are suppressed unless `TEST_LOG` is set.
pub fn init_test() {
    if std::env::var_os("TEST_LOG").is_none() {
        return;
    }

    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let formatting_layer = fmt::layer().with_target(true).with_test_writer();
        let subscriber = Registry::default()
            .with(env_filter("debug"))
            .with(formatting_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
