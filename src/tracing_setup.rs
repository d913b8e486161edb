//! Structured logging setup for the registry process.
//!
//! Configures structured logging with file names, line numbers, log levels,
//! and span events via the `tracing`/`tracing-subscriber` ecosystem. The
//! level is driven by config (`--log-level`, env, or config file) rather
//! than fixed, so operators can raise verbosity without a redeploy.

use tracing_subscriber::{
    EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initializes the global tracing subscriber. `level` is parsed as an
/// `EnvFilter` directive (e.g. `"info"`, `"debug,hyper=warn"`); an invalid
/// directive falls back to `info`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(filter),
        )
        .init();
}
