//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_cache_requests_total` (counter): cache lookups by entity class and result
//! - `resilience_cache_entries` (gauge): live entries in the in-memory store
//! - `resilience_retry_attempts_total` (counter): re-attempts per dependency
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_remediation_total` (counter): remediation attempts by kind and outcome
//! - `resilience_remediation_latency_ms` (histogram): time to remediate
//! - `resilience_threat_actions_total` (counter): block/quarantine/monitor decisions
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing for it.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(class: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("resilience_cache_requests_total", "class" => class, "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("resilience_cache_entries").set(entries as f64);
}

pub fn record_retry(dependency: &str) {
    counter!("resilience_retry_attempts_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_circuit_state(dependency: &str, state: u8) {
    gauge!("resilience_circuit_state", "dependency" => dependency.to_string()).set(state as f64);
}

pub fn record_remediation(kind: &'static str, success: bool, latency_ms: u64) {
    let outcome = if success { "success" } else { "failure" };
    counter!("resilience_remediation_total", "kind" => kind, "outcome" => outcome).increment(1);
    histogram!("resilience_remediation_latency_ms", "kind" => kind).record(latency_ms as f64);
}

pub fn record_threat_action(action: &'static str) {
    counter!("resilience_threat_actions_total", "action" => action).increment(1);
}
