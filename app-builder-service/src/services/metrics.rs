//! Metrics collection for app-builder-service.
//!
//! HTTP metrics flow through the `metrics` recorder; build lifecycle
//! counters live in a dedicated Prometheus registry.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::{Once, OnceLock};

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static BUILDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static BUILD_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static EVALUATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static LLM_TOKENS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

static INIT: Once = Once::new();

/// Initialize metrics collection. Later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus recorder not installed");
            }
        }

        let registry = Registry::new();

        let builds = IntCounterVec::new(
            Opts::new(
                "app_builder_builds_total",
                "Builds by kind (create/revise) and outcome",
            ),
            &["kind", "outcome"],
        )
        .expect("Failed to create app_builder_builds_total metric");

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "app_builder_build_duration_seconds",
                "Wall-clock time from acceptance to deployment",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
            &["kind"],
        )
        .expect("Failed to create app_builder_build_duration_seconds metric");

        let evaluations = IntCounterVec::new(
            Opts::new(
                "app_builder_evaluations_total",
                "Evaluation callbacks by status",
            ),
            &["status"],
        )
        .expect("Failed to create app_builder_evaluations_total metric");

        let tokens = IntCounterVec::new(
            Opts::new("app_builder_llm_tokens_total", "LLM tokens by provider and direction"),
            &["provider", "direction"],
        )
        .expect("Failed to create app_builder_llm_tokens_total metric");

        registry
            .register(Box::new(builds.clone()))
            .expect("Failed to register app_builder_builds_total");
        registry
            .register(Box::new(duration.clone()))
            .expect("Failed to register app_builder_build_duration_seconds");
        registry
            .register(Box::new(evaluations.clone()))
            .expect("Failed to register app_builder_evaluations_total");
        registry
            .register(Box::new(tokens.clone()))
            .expect("Failed to register app_builder_llm_tokens_total");

        let _ = PROMETHEUS_REGISTRY.set(registry);
        let _ = BUILDS_TOTAL.set(builds);
        let _ = BUILD_DURATION_SECONDS.set(duration);
        let _ = EVALUATIONS_TOTAL.set(evaluations);
        let _ = LLM_TOKENS_TOTAL.set(tokens);
    });
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_build(kind: &str, outcome: &str) {
    if let Some(counter) = BUILDS_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

pub fn record_build_duration(kind: &str, seconds: f64) {
    if let Some(histogram) = BUILD_DURATION_SECONDS.get() {
        histogram.with_label_values(&[kind]).observe(seconds);
    }
}

pub fn record_evaluation(status: &str) {
    if let Some(counter) = EVALUATIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_llm_tokens(provider: &str, input: u32, output: u32) {
    if let Some(counter) = LLM_TOKENS_TOTAL.get() {
        counter
            .with_label_values(&[provider, "input"])
            .inc_by(u64::from(input));
        counter
            .with_label_values(&[provider, "output"])
            .inc_by(u64::from(output));
    }
}
