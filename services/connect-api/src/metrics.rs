//! Prometheus metrics exposition
//!
//! - `webhook_deliveries_total` (counter): label `outcome`
//!   (persisted | deduped | rejected_signature | rejected_payload | error)
//! - `webhook_ingest_duration_seconds` (histogram)
//! - `oauth_connections_total` (counter): label `result`
//!   (connected | state_rejected | exchange_failed | provider_denied)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `webhook_ingest_duration_seconds` with explicit buckets so it
/// renders as a histogram (with `_bucket` lines for `histogram_quantile()`
/// queries) rather than the default summary. Ingestion is a local SQLite
/// write, so the buckets top out at one second.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "webhook_ingest_duration_seconds".to_string(),
            ),
            &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one webhook delivery with its outcome label.
pub fn record_webhook_delivery(outcome: &str) {
    metrics::counter!("webhook_deliveries_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how long one delivery spent in the ingestion pipeline.
pub fn record_ingest_duration(duration_secs: f64) {
    metrics::histogram!("webhook_ingest_duration_seconds").record(duration_secs);
}

/// Record one OAuth callback completion with its result label.
pub fn record_oauth_connection(result: &str) {
    metrics::counter!("oauth_connections_total", "result" => result.to_string()).increment(1);
}
