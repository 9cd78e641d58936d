//! Tracing infrastructure for kronos diagnostics.
//!
//! Enabled by the `tracing` feature (on by default). With the feature off,
//! every diagnostic macro compiles to a no-op so the hot path carries zero
//! logging overhead.
//!
//! The subscriber is the pluggable sink: install any `tracing` subscriber to
//! redirect wheel diagnostics. [`init_tracing`] installs a plain fmt
//! subscriber for binaries and tests that just want output on stderr.

/// Initialize a fmt tracing subscriber filtered by `RUST_LOG`.
///
/// Falls back to `kronos=info` when no filter is set in the environment.
/// Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kronos=info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

// With the feature enabled, the crate logs through the tracing macros.
#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, warn};

// Without it, swap in no-op implementations.
#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use error_noop as error;
#[cfg(not(feature = "tracing"))]
pub(crate) use info_noop as info;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;
