use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,resilient_cache=trace
///
/// Set CACHE_LOG_FORMAT=json for one JSON object per event.
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let json = std::env::var("CACHE_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // Useful for debugging concurrency issues
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging cache operations with timing
#[macro_export]
macro_rules! cache_op {
    ($operation:expr, $key:expr, $tier:expr, $outcome:expr, $elapsed:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            tier = $tier,
            outcome = $outcome,
            elapsed_ms = $elapsed.as_secs_f64() * 1000.0,
            "Cache operation"
        )
    };
}
