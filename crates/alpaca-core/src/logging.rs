//! Logging initialization for alpaca.
//!
//! The connection core emits `tracing` events (connection created, rejected
//! and freed at `debug`, failed writes at `warn`). Nothing is printed until a
//! subscriber is installed, which is what these helpers do.
//!
//! The level is controlled by the `RUST_LOG` environment variable:
//!
//! ```bash
//! # Connection lifecycle events
//! RUST_LOG=alpaca_core=debug cargo run
//!
//! # Only warnings and errors (production)
//! RUST_LOG=warn cargo run
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging, defaulting to `info` when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize logging with `level` as the fallback filter.
///
/// `RUST_LOG` still wins when it is set.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_logging_with_level`], but returns `false` instead of
/// panicking when a subscriber is already installed. Handy in tests.
pub fn try_init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
