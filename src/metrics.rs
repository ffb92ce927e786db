//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a successful claim (`kind` is `base_model` or `model`)
pub fn record_claim(kind: &'static str) {
    metrics::counter!("model_manager_claims_total", "kind" => kind).increment(1);
}

/// Record a lost claim race
pub fn record_claim_conflict(kind: &'static str) {
    metrics::counter!("model_manager_claim_conflicts_total", "kind" => kind).increment(1);
}

/// Record the outcome of one load attempt
pub fn record_load(kind: &'static str, outcome: &'static str) {
    metrics::counter!("model_manager_loads_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_uploaded_files(count: usize) {
    metrics::counter!("model_manager_uploaded_files_total").increment(count as u64);
}

/// Update the number of loads in flight on this worker
pub fn update_active_loads(count: usize) {
    metrics::gauge!("model_manager_active_loads").set(count as f64);
}
