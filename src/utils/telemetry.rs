//! Structured logging setup.
//!
//! Log lines are tagged with the channel id (`[#channel]`) so a single
//! channel can be followed with a plain grep. Verbosity comes from
//! `RUST_LOG`.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is unset: INFO everywhere, DEBUG for us.
pub const DEFAULT_LOG_FILTER: &str = "info,team_monitor=debug";

/// Initializes compact, human-readable logging.
///
/// Example RUST_LOG values:
/// - `info` - All info and above
/// - `team_monitor=trace` - Per-notification viewer counts
/// - `team_monitor=debug,tokio_tungstenite=warn` - Quiet socket internals
pub fn init_telemetry() {
    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    subscriber.init();
}

/// Initializes JSON logging (for production).
pub fn init_telemetry_json() {
    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE));

    subscriber.init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process.
    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
