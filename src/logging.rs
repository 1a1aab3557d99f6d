//! Log output setup for binaries.
//!
//! Library code only emits `tracing` events; each volume manager and
//! bootloader backend logs inside its own span. Binaries call [`init`]
//! once to print them.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a verbosity level, overridden by `RUST_LOG`.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "appliance_builder=info",
        1 => "appliance_builder=debug",
        _ => "appliance_builder=trace",
    }
}

/// Install a global stderr subscriber. Calling it twice is harmless; the
/// second subscriber is dropped.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
