use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder. Fails if a recorder is already installed.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    init_metric_descriptions();

    Ok(handle)
}

/// Describe all metrics (safe to call more than once)
fn init_metric_descriptions() {
    describe_counter!(
        "insights_logs_ingested_total",
        "Request logs accepted by the ingester"
    );
    describe_counter!(
        "insights_logs_rejected_total",
        "Request logs rejected before aggregation"
    );
    describe_counter!(
        "insights_sealed_total",
        "Aggregation windows sealed into insights"
    );
    describe_counter!("insights_search_total", "Log searches by outcome");
    describe_histogram!(
        "insights_search_duration_seconds",
        "Log search duration in seconds"
    );
    describe_gauge!(
        "insights_live_accumulators",
        "Request ids with a live accumulator"
    );
    describe_gauge!(
        "insights_writer_backlog",
        "Persistence jobs waiting for the writer"
    );
    describe_gauge!("insights_build_info", "Service version information");

    gauge!("insights_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_ingested() {
    counter!("insights_logs_ingested_total").increment(1);
}

/// Record a rejected log; `reason` is an `error_type_name`
pub fn record_rejected(reason: &str) {
    counter!("insights_logs_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record a sealed window; `trigger` is `count`, `interval` or `manual`
pub fn record_sealed(trigger: &str) {
    counter!("insights_sealed_total", "trigger" => trigger.to_string()).increment(1);
}

pub fn record_search(outcome: &str, duration: Duration) {
    counter!("insights_search_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("insights_search_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_live_accumulators(count: usize) {
    gauge!("insights_live_accumulators").set(count as f64);
}

pub fn set_writer_backlog(depth: usize) {
    gauge!("insights_writer_backlog").set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics_without_recorder() {
        init_metric_descriptions();

        record_ingested();
        record_rejected("validation_error");
        record_sealed("manual");
        record_search("ok", Duration::from_millis(12));
        set_live_accumulators(3);
        set_writer_backlog(0);
    }
}
