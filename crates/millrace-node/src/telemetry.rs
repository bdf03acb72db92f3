use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

/// Initializes structured logging via `tracing-subscriber`.
///
/// This configures the default global subscriber with:
/// - Environment-based log level filtering (via `RUST_LOG`)
/// - Event-only formatting with thread IDs for diagnostics
pub fn init_tracing() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_span_events(FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}
