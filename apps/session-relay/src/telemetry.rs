use std::io;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs the relay's subscriber. Logs go to stderr because stdout carries
/// relayed frames and `status` output. An unparseable filter falls back to
/// `info`; a second call keeps the first subscriber.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);
    let _ = Registry::default().with(env_filter).with(fmt_layer).try_init();
}
