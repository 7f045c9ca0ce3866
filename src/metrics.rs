use lazy_static::lazy_static;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};

/// Metric name prefix for all pushcore metrics
const PREFIX: &str = "pushcore";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingestion Metrics
    pub static ref INGESTION_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingestion_outcomes_total"), "Payloads processed by the generation pipeline"),
        &["outcome"]
    ).expect("Failed to create ingestion_outcomes_total metric");

    pub static ref EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_evictions_total"),
        "Notifications evicted by the visible limit"
    ).expect("Failed to create evictions_total metric");

    pub static ref RESTORED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_restored_total"),
        "Notifications re-displayed by restoration"
    ).expect("Failed to create restored_total metric");

    pub static ref DISPLAY_RESULTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_display_results_total"), "Display requests by result"),
        &["result"]
    ).expect("Failed to create display_results_total metric");

    // Reporting Metrics
    pub static ref OPERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_operations_total"), "Operations executed by executor and status"),
        &["executor", "status"]
    ).expect("Failed to create operations_total metric");

    pub static ref VISIBLE_NOTIFICATIONS: Gauge = Gauge::new(
        format!("{PREFIX}_visible_notifications"),
        "Notifications currently visible (last badge count)"
    ).expect("Failed to create visible_notifications metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job runs by status"),
        &["job", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["job"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job"]
    ).expect("Failed to create background_job_running metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(INGESTION_OUTCOMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EVICTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RESTORED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DISPLAY_RESULTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(VISIBLE_NOTIFICATIONS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::debug!("Metrics registered");
}

/// Record the terminal disposition of one pipeline run
pub fn record_ingestion(outcome: &str) {
    INGESTION_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_evictions(count: usize) {
    EVICTIONS_TOTAL.inc_by(count as u64);
}

pub fn record_restored(count: usize) {
    RESTORED_TOTAL.inc_by(count as u64);
}

pub fn record_display(result: &str) {
    DISPLAY_RESULTS_TOTAL.with_label_values(&[result]).inc();
}

/// Record an operation attempt result
pub fn record_operation(executor: &str, status: &str) {
    OPERATIONS_TOTAL.with_label_values(&[executor, status]).inc();
}

pub fn set_visible_notifications(count: usize) {
    VISIBLE_NOTIFICATIONS.set(count as f64);
}

/// Record a finished background job run
pub fn record_background_job_execution(job: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job])
        .set(if running { 1.0 } else { 0.0 });
}

/// Text exposition of every registered metric.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_metric(name: &str) -> bool {
        REGISTRY
            .gather()
            .iter()
            .any(|m| m.get_name() == format!("{PREFIX}_{name}"))
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        init_metrics();
        assert!(!REGISTRY.gather().is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_ingestion() {
        init_metrics();
        record_ingestion("display_requested");
        assert!(has_metric("ingestion_outcomes_total"));
    }

    #[test]
    fn test_record_operation() {
        init_metrics();
        record_operation("track_received", "success");
        record_operation("track_received", "retry");
        assert!(has_metric("operations_total"));
    }

    #[test]
    fn test_record_background_job() {
        init_metrics();
        set_background_job_running("notification_cleanup", true);
        record_background_job_execution("notification_cleanup", "success", Duration::from_millis(5));
        set_background_job_running("notification_cleanup", false);
        assert!(has_metric("background_job_executions_total"));
        assert!(has_metric("background_job_running"));
    }

    #[test]
    fn test_gather_text_contains_counters() {
        init_metrics();
        record_evictions(2);
        let text = gather_text();
        assert!(text.contains("pushcore_evictions_total"));
    }
}
