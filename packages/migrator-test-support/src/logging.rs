//! Test logger construction
//!
//! Migrators own their logger, so tests build one per instance instead of
//! installing a global subscriber.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Build a logger for a migrator under test.
///
/// The level is controlled in this order of precedence:
///
/// 1. `TEST_LOG` environment variable (preferred)
/// 2. `RUST_LOG` environment variable (fallback)
/// 3. `"warn"` (default, quiet)
pub fn test_logger() -> Dispatch {
    let filter = std::env::var("TEST_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer() // Critical for cargo/nextest capture
        .without_time() // Stable output
        .finish();

    Dispatch::new(subscriber)
}
