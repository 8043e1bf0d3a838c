//! Prometheus metrics for the workflow service.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Label cardinality is bounded by construction: kinds × actions × channels.

use prometheus::{opts, register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::sync::OnceLock;

use crate::models::request::{RequestKind, TransitionAction};

struct Recorder {
    transitions_total: CounterVec,
    notifications_total: CounterVec,
    broadcasts_total: CounterVec,
}

fn recorder() -> &'static Recorder {
    static RECORDER: OnceLock<Recorder> = OnceLock::new();
    RECORDER.get_or_init(|| Recorder {
        transitions_total: register_counter_vec!(
            opts!("seferet_transitions_total", "Committed workflow transitions"),
            &["kind", "action"]
        )
        .expect("failed to register seferet_transitions_total"),
        notifications_total: register_counter_vec!(
            opts!("seferet_notifications_total", "Notification deliveries by channel and outcome"),
            &["channel", "outcome"]
        )
        .expect("failed to register seferet_notifications_total"),
        broadcasts_total: register_counter_vec!(
            opts!("seferet_broadcasts_total", "Broadcast events published"),
            &["event"]
        )
        .expect("failed to register seferet_broadcasts_total"),
    })
}

pub fn record_transition(kind: RequestKind, action: TransitionAction) {
    recorder()
        .transitions_total
        .with_label_values(&[kind.event_prefix(), action.as_str()])
        .inc();
}

pub fn record_notifications(channel: &str, outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    recorder()
        .notifications_total
        .with_label_values(&[channel, outcome])
        .inc_by(count as f64);
}

pub fn record_broadcast(event: &str) {
    recorder()
        .broadcasts_total
        .with_label_values(&[event])
        .inc();
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_returns_valid_text() {
        record_transition(RequestKind::Ad, TransitionAction::Approve);
        let output = encode_metrics();
        assert!(output.contains("seferet_transitions_total"));
    }
}
