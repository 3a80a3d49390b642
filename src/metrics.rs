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

/// Where a catalog lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Remote,
}

impl LookupSource {
    fn as_str(self) -> &'static str {
        match self {
            LookupSource::Cache => "cache",
            LookupSource::Remote => "remote",
        }
    }
}

/// Record a listing or metadata lookup
pub fn record_catalog_lookup(kind: &'static str, source: LookupSource) {
    metrics::counter!("model_manager_catalog_lookups_total",
        "kind" => kind,
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record a finished model download
pub fn record_download(success: bool) {
    metrics::counter!("model_manager_downloads_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record one artifact file written to disk
pub fn record_file_downloaded(bytes: u64) {
    metrics::counter!("model_manager_downloaded_files_total").increment(1);
    metrics::counter!("model_manager_downloaded_bytes_total").increment(bytes);
}

/// Record an activation attempt
pub fn record_activation(success: bool) {
    metrics::counter!("model_manager_activations_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Update local model count gauge
pub fn update_local_model_count(count: usize) {
    metrics::gauge!("model_manager_local_models").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counters_carry_no_model_label() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_download(true);
            record_download(true);
            record_activation(false);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"model_manager_downloads_total{outcome="success"} 2"#));
        assert!(rendered.contains(r#"model_manager_activations_total{outcome="failure"} 1"#));
        assert!(!rendered.contains("model=\""));
    }
}
