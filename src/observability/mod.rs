//! # Observability
//!
//! Structured logging setup for embedders of the compiler. The compiler
//! itself only emits `tracing` events; exporting them is the host's concern.

use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::Result;

/// Initialize a `tracing` subscriber reading its filter from `RUST_LOG`.
///
/// Falls back to `info` when the variable is unset. Safe to call once per
/// process; embedders that install their own subscriber should skip this.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let subscriber = fmt().with_env_filter(filter).with_target(true).finish();

    // Ignore the error when a subscriber is already installed (tests).
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

// NOTE: `init_is_idempotent` lives in `tests/observability.rs` rather than an
// inline `#[cfg(test)] mod tests` here. It installs a process-global tracing
// subscriber via `set_global_default`, which conflicts with the
// `#[traced_test]` macro used elsewhere in the lib test binary (only one global
// default subscriber can be installed per process). Running it in its own
// integration-test binary keeps both tests green without changing either.
