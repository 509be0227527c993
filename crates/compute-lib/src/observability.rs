//! Prometheus metrics for the compute service
//!
//! Metrics register against the default registry exactly once per process;
//! [`ServiceMetrics`] is a cheap handle onto that global state.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for compute latency (seconds). Computations range from
/// microseconds (memoized engine calls) to whole seconds (large inputs).
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    compute_latency_seconds: Histogram,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    compute_errors: IntCounter,
    samples_recorded: IntCounter,
    sampler_errors: IntCounter,
    active_workers: IntGauge,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            compute_latency_seconds: register_histogram!(
                "compute_api_compute_latency_seconds",
                "Wall-clock time spent in isolated computation workers",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register compute_latency_seconds"),

            cache_hits: register_int_counter!(
                "compute_api_cache_hits_total",
                "Requests served from memoized results"
            )
            .expect("Failed to register cache_hits_total"),

            cache_misses: register_int_counter!(
                "compute_api_cache_misses_total",
                "Requests that required a fresh computation"
            )
            .expect("Failed to register cache_misses_total"),

            compute_errors: register_int_counter!(
                "compute_api_compute_errors_total",
                "Computations that failed in the worker"
            )
            .expect("Failed to register compute_errors_total"),

            samples_recorded: register_int_counter!(
                "compute_api_samples_recorded_total",
                "Host resource samples persisted by the background sampler"
            )
            .expect("Failed to register samples_recorded_total"),

            sampler_errors: register_int_counter!(
                "compute_api_sampler_errors_total",
                "Sampler ticks that failed to probe or persist"
            )
            .expect("Failed to register sampler_errors_total"),

            active_workers: register_int_gauge!(
                "compute_api_active_workers",
                "Isolated computation workers currently running"
            )
            .expect("Failed to register active_workers"),
        }
    }
}

/// Handle to the process-global service metrics.
#[derive(Clone, Default)]
pub struct ServiceMetrics {
    _private: (),
}

impl ServiceMetrics {
    /// Create a handle, initializing the global metrics on first call.
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn observe_compute_latency(&self, duration_secs: f64) {
        self.inner().compute_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cache_hit(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().cache_misses.inc();
    }

    pub fn inc_compute_error(&self) {
        self.inner().compute_errors.inc();
    }

    pub fn inc_sample_recorded(&self) {
        self.inner().samples_recorded.inc();
    }

    pub fn inc_sampler_error(&self) {
        self.inner().sampler_errors.inc();
    }

    pub fn inc_active_workers(&self) {
        self.inner().active_workers.inc();
    }

    pub fn dec_active_workers(&self) {
        self.inner().active_workers.dec();
    }
}
