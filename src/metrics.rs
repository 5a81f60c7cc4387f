// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the nodenet agent.
//!
//! All metrics live in one registry with the namespace prefix `nodenet_io_`
//! and are exposed via the `/metrics` endpoint.

use crate::source::Source;
use prometheus::{CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all nodenet metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "nodenet_io";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics`.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Lag between endpoint creation (CNI event) and the matching pod event
/// arriving from the API server, in seconds.
pub static EVENT_LAG_SECONDS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::with_opts(Opts::new(
        format!("{METRICS_NAMESPACE}_k8s_event_lag_seconds"),
        "Lag between local endpoint creation and the pod event from the API server",
    ))
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total pod notifications processed, by action
///
/// Labels:
/// - `action`: `add`, `update`, or `delete`
pub static POD_EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pod_events_total"),
        "Total pod notifications processed by action",
    );
    let counter = CounterVec::new(opts, &["action"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total cache upserts rejected by the authority check
///
/// Labels:
/// - `existing`: source holding the entry
/// - `attempted`: source whose write was rejected
pub static OVERWRITE_REJECTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_cache_overwrite_rejected_total"),
        "Total cache upserts rejected by source authority arbitration",
    );
    let counter = CounterVec::new(opts, &["existing", "attempted"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total cache deletions refused by ownership or authority verification
///
/// Labels:
/// - `reason`: `owner-mismatch` or `authority`
pub static DELETE_SKIPPED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_cache_delete_skipped_total"),
        "Total cache deletions refused by ownership or authority verification",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total label mirror task outcomes
///
/// Labels:
/// - `outcome`: `success`, `retry`, or `gave-up`
pub static MIRROR_SYNC_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_mirror_sync_total"),
        "Total label mirror task outcomes",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Record the lag between endpoint creation and the pod add event.
pub fn record_event_lag(lag: Duration) {
    EVENT_LAG_SECONDS.set(lag.as_secs_f64());
}

/// Reset the event lag gauge (no endpoint existed before the pod event).
pub fn reset_event_lag() {
    EVENT_LAG_SECONDS.set(0.0);
}

/// Record one processed pod notification.
pub fn record_pod_event(action: &str) {
    POD_EVENTS_TOTAL.with_label_values(&[action]).inc();
}

/// Record a cache upsert rejected by the authority check.
pub fn record_overwrite_rejected(existing: Source, attempted: Source) {
    OVERWRITE_REJECTED_TOTAL
        .with_label_values(&[&existing.to_string(), &attempted.to_string()])
        .inc();
}

/// Record a cache deletion refused by verification.
pub fn record_delete_skipped(reason: &str) {
    DELETE_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a label mirror task outcome.
pub fn record_mirror_sync(outcome: &str) {
    MIRROR_SYNC_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_lag_set_and_reset() {
        record_event_lag(Duration::from_secs(3));
        assert!((EVENT_LAG_SECONDS.get() - 3.0).abs() < f64::EPSILON);

        reset_event_lag();
        assert!(EVENT_LAG_SECONDS.get().abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_metrics() {
        record_pod_event("add");
        record_overwrite_rejected(Source::Local, Source::Kubernetes);

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("nodenet_io"));
        assert!(metrics_text.contains("pod_events_total"));
    }
}
