//! Prometheus metrics for comment fan-out.
//!
//! Collectors register with the default registry; `render()` encodes every
//! gathered family in the text exposition format for whatever transport the
//! host process exposes.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Comments handed to a subscriber's buffer.
    pub static ref FANOUT_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        "comment_fanout_delivered_total",
        "Comments delivered to subscriber buffers"
    )
    .expect("failed to register comment_fanout_delivered_total");

    /// Comments not delivered because a subscriber buffer was full.
    pub static ref FANOUT_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "comment_fanout_dropped_total",
        "Comments dropped for full subscriber buffers segmented by overflow policy",
        &["policy"]
    )
    .expect("failed to register comment_fanout_dropped_total");

    /// Subscribers removed by the broker (slow or closed sinks).
    pub static ref FANOUT_DISCONNECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "comment_fanout_disconnected_total",
        "Subscribers removed by the broker segmented by reason",
        &["reason"]
    )
    .expect("failed to register comment_fanout_disconnected_total");

    pub static ref SUBSCRIPTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "comment_subscriptions_active",
        "Currently registered comment subscriptions"
    )
    .expect("failed to register comment_subscriptions_active");
}

/// Render all registered metrics in Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
