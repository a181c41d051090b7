use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

pub static MESSAGES_SENT: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_messages_sent_total",
        "messages written straight to an open connection",
    )
});

pub static MESSAGES_BUFFERED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_messages_buffered_total",
        "messages queued because no open connection was available",
    )
});

pub static MESSAGES_DRAINED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_messages_drained_total",
        "buffered messages delivered after a reconnect",
    )
});

pub static FRAMES_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_frames_dispatched_total",
        "inbound frames routed to an endpoint",
    )
});

pub static FRAMES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_frames_dropped_total",
        "inbound frames for urls no endpoint owns",
    )
});

pub static RECONNECTS_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "session_reconnects_scheduled_total",
        "reconnect attempts scheduled by the sustainer",
    )
});

pub static INITIALIZE_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "session_initialize_total",
            "endpoint initializations by outcome",
        ),
        &["result"],
    )
    .expect("valid counter vec opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
