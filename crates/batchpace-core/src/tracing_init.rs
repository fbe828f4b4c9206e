//! Shared tracing/logging initialization.
//!
//! Logs go to stderr so that the launcher's report lines on stdout stay
//! machine-readable.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `default_filter` when set. `log_json` switches the
/// line format to one JSON object per event.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let lines = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry.with(lines.json().with_current_span(false)).init();
    } else {
        registry.with(lines).init();
    }
}

/// Build the default filter directive for the given crate and level.
///
/// `quiet` raises the floor to `warn` regardless of the requested level.
pub fn default_filter(crate_name: &str, level: &str, quiet: bool) -> String {
    let level = if quiet { "warn" } else { level };
    format!("{crate_name}={level},batchpace_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_installs_global_subscriber() {
        init_tracing("batchpace_core=debug", true);
        assert!(tracing::dispatcher::has_been_set());
        tracing::debug!(check = true, "Subscriber installed");
    }

    #[test]
    fn default_filter_uses_requested_level() {
        assert_eq!(
            default_filter("batchpace_runner", "debug", false),
            "batchpace_runner=debug,batchpace_core=debug"
        );
    }

    #[test]
    fn quiet_forces_warn() {
        assert_eq!(
            default_filter("batchpace_runner", "debug", true),
            "batchpace_runner=warn,batchpace_core=warn"
        );
    }
}
