//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the case pipeline with
//! standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all KycFlow metrics
pub const METRICS_PREFIX: &str = "kycflow";

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Case metrics
    describe_counter!(
        format!("{}_cases_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total cases submitted"
    );

    describe_counter!(
        format!("{}_case_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Total case state transitions"
    );

    describe_gauge!(
        format!("{}_cases_pending", METRICS_PREFIX),
        Unit::Count,
        "Cases currently in non-terminal states"
    );

    // Extraction metrics
    describe_counter!(
        format!("{}_extraction_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total document extraction requests"
    );

    describe_histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document extraction latency in seconds"
    );

    // Screening metrics
    describe_counter!(
        format!("{}_screening_outcomes_total", METRICS_PREFIX),
        Unit::Count,
        "Screening classifications by outcome"
    );

    // Outreach metrics
    describe_counter!(
        format!("{}_outreach_raised_total", METRICS_PREFIX),
        Unit::Count,
        "Outreach tickets raised by reason"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a case submission
pub fn record_case_created(kind: &str) {
    counter!(
        format!("{}_cases_created_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a case state transition
pub fn record_transition(from: &str, to: &str) {
    counter!(
        format!("{}_case_transitions_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record an extraction call
pub fn record_extraction(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_extraction_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_extraction_duration_seconds", METRICS_PREFIX))
            .record(duration_secs);
    }
}

/// Record a screening classification
pub fn record_screening(outcome: &str) {
    counter!(
        format!("{}_screening_outcomes_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an outreach ticket raise
pub fn record_outreach(reason: &str) {
    counter!(
        format!("{}_outreach_raised_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Set the pending-cases gauge
pub fn set_pending_cases(count: u64) {
    gauge!(format!("{}_cases_pending", METRICS_PREFIX)).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("GET", "/v1/cases");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_transition_counter() {
        record_transition("screened", "auto_updated");
        record_screening("clear");
        record_outreach("material_change");
    }
}
