// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// NOTE: When observability feature is disabled, the macros below compile to nothing
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Registers descriptions for every metric the crate emits. Call once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "marketplace_logs_fetched_total",
        "Event logs returned by eth_getLogs, by event."
    );
    describe_counter!(
        "marketplace_ranges_skipped_total",
        "Block ranges dropped for this pass, by reason."
    );
    describe_counter!(
        "marketplace_classifier_logs_total",
        "Logs handed to a classifier, by event and outcome."
    );
    describe_counter!(
        "marketplace_logs_quarantined_total",
        "Logs dead-lettered after repeated classification failures."
    );
    describe_gauge!(
        "marketplace_cursor_block",
        "Last processed block per chain."
    );
    describe_histogram!(
        "marketplace_sync_duration_seconds",
        "Wall time of one sync pass."
    );
    describe_counter!(
        "marketplace_validations_total",
        "Order validation outcomes, by result and reason."
    );
    describe_counter!("rpc_429_total", "Rate-limit responses, by provider host.");
    describe_gauge!(
        "rpc_circuit_breaker_state",
        "Circuit breaker state per provider (0=closed, 1=open)."
    );
}

/// Installs the Prometheus scrape endpoint on `0.0.0.0:port`.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;
    describe_metrics();
    Ok(())
}

// --- Helper functions to update metrics ---

pub fn record_logs_fetched(event: &'static str, count: usize) {
    counter!("marketplace_logs_fetched_total", count as u64, "event" => event);
}

pub fn increment_skipped_range(event: &'static str, reason: &'static str) {
    counter!("marketplace_ranges_skipped_total", 1, "event" => event, "reason" => reason);
}

pub fn increment_classifier_logs(event: &'static str, outcome: &'static str, count: u64) {
    counter!("marketplace_classifier_logs_total", count, "event" => event, "outcome" => outcome);
}

pub fn increment_quarantined(event: &'static str) {
    counter!("marketplace_logs_quarantined_total", 1, "event" => event);
}

pub fn set_cursor_block(chain_id: u64, block: u64) {
    gauge!("marketplace_cursor_block", block as f64, "chain_id" => chain_id.to_string());
}

pub fn record_sync_duration(chain_id: u64, duration: std::time::Duration) {
    histogram!("marketplace_sync_duration_seconds", duration.as_secs_f64(), "chain_id" => chain_id.to_string());
}

pub fn increment_validation(result: &'static str, reason: &'static str) {
    counter!("marketplace_validations_total", 1, "result" => result, "reason" => reason);
}

pub fn increment_rpc_429(host: &str) {
    counter!("rpc_429_total", 1, "host" => host.to_string());
}

pub fn set_circuit_breaker_state(provider_url: &str, state: f64) {
    gauge!("rpc_circuit_breaker_state", state, "provider" => provider_url.to_string());
}
