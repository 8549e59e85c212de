//! Structured logging setup.
//!
//! Events go to stderr so that `predict` can still stream its artifact to stdout.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "NGPIPE_LOG";

/// Initialize the global subscriber once. Later calls are no-ops.
pub fn init_logging(verbose: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true),
        );

        // Another subscriber may already be installed (e.g. by a test harness).
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_selects_debug() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "info");
    }

    #[test]
    fn init_is_idempotent() {
        init_logging(false);
        init_logging(true);
    }
}
