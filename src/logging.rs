//! Tracing subscriber setup for the binary.
//!
//! Reads `RUST_LOG`; defaults to `info`. Output goes to stderr. The library
//! itself only emits events and never installs a subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
