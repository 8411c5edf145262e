//! Process metrics for fanout.
//!
//! Counters are plain atomics in a process-wide registry and are exported in
//! Prometheus text format by the telemetry listener.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === HTTP ===
    /// Total HTTP requests served
    pub http_requests_total: AtomicU64,
    /// Requests answered with 2xx
    pub http_requests_2xx: AtomicU64,
    /// Requests answered with 4xx
    pub http_requests_4xx: AtomicU64,
    /// Requests answered with 5xx
    pub http_requests_5xx: AtomicU64,
    /// Total request latency in microseconds
    pub http_request_latency_us_total: AtomicU64,
    /// Requests rejected by the rate limiter
    pub http_rate_limited: AtomicU64,

    // === Entity services ===
    /// Calls into entity stores
    pub store_ops_total: AtomicU64,
    /// Store calls that failed
    pub store_errors_total: AtomicU64,
    /// Total store time in microseconds
    pub store_time_us_total: AtomicU64,

    // === Counts cache ===
    /// Counts served from the cache
    pub cache_hits: AtomicU64,
    /// Counts read through to the store
    pub cache_misses: AtomicU64,

    // === Change sources ===
    /// Changes handed to a source
    pub changes_propagated: AtomicU64,
    /// Changes a source refused
    pub changes_propagate_failed: AtomicU64,
    /// Envelopes taken by consumers
    pub changes_consumed: AtomicU64,
    /// Envelopes acknowledged
    pub changes_acked: AtomicU64,

    // === Pipeline ===
    /// Messages produced by rules
    pub messages_rendered: AtomicU64,
    /// Pipeline runs that failed
    pub pipeline_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_requests_2xx: AtomicU64::new(0),
            http_requests_4xx: AtomicU64::new(0),
            http_requests_5xx: AtomicU64::new(0),
            http_request_latency_us_total: AtomicU64::new(0),
            http_rate_limited: AtomicU64::new(0),

            store_ops_total: AtomicU64::new(0),
            store_errors_total: AtomicU64::new(0),
            store_time_us_total: AtomicU64::new(0),

            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),

            changes_propagated: AtomicU64::new(0),
            changes_propagate_failed: AtomicU64::new(0),
            changes_consumed: AtomicU64::new(0),
            changes_acked: AtomicU64::new(0),

            messages_rendered: AtomicU64::new(0),
            pipeline_failures: AtomicU64::new(0),
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, status_code: u16, latency: Duration) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);

        match status_code {
            200..=299 => self.http_requests_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.http_requests_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.http_requests_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        self.http_request_latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a request rejected by the rate limiter.
    pub fn record_rate_limited(&self) {
        self.http_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entity service operation.
    pub fn record_store_op(&self, duration: Duration, is_error: bool) {
        self.store_ops_total.fetch_add(1, Ordering::Relaxed);
        self.store_time_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if is_error {
            self.store_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a counts cache lookup.
    pub fn record_cache_access(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a change propagation attempt.
    pub fn record_propagation(&self, success: bool) {
        if success {
            self.changes_propagated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.changes_propagate_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an envelope pulled from a change source.
    pub fn record_consumed(&self) {
        self.changes_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acknowledged envelope.
    pub fn record_acked(&self) {
        self.changes_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one pipeline run.
    pub fn record_pipeline(&self, messages: usize, failed: bool) {
        self.messages_rendered
            .fetch_add(messages as u64, Ordering::Relaxed);
        if failed {
            self.pipeline_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            http_requests_total: load(&self.http_requests_total),
            http_requests_2xx: load(&self.http_requests_2xx),
            http_requests_4xx: load(&self.http_requests_4xx),
            http_requests_5xx: load(&self.http_requests_5xx),
            http_request_latency_avg_us: average(
                load(&self.http_request_latency_us_total),
                load(&self.http_requests_total),
            ),
            http_rate_limited: load(&self.http_rate_limited),
            store_ops_total: load(&self.store_ops_total),
            store_errors_total: load(&self.store_errors_total),
            store_op_avg_time_us: average(
                load(&self.store_time_us_total),
                load(&self.store_ops_total),
            ),
            cache_hit_rate: self.cache_hit_rate(),
            changes_propagated: load(&self.changes_propagated),
            changes_propagate_failed: load(&self.changes_propagate_failed),
            changes_consumed: load(&self.changes_consumed),
            changes_acked: load(&self.changes_acked),
            messages_rendered: load(&self.messages_rendered),
            pipeline_failures: load(&self.pipeline_failures),
        }
    }

    fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        metric(&mut out, "http_requests_total", "Total HTTP requests", "counter", s.http_requests_total);
        out.push_str("# HELP fanout_http_requests_by_status HTTP requests by status\n");
        out.push_str("# TYPE fanout_http_requests_by_status counter\n");
        for (class, value) in [
            ("2xx", s.http_requests_2xx),
            ("4xx", s.http_requests_4xx),
            ("5xx", s.http_requests_5xx),
        ] {
            let _ = writeln!(out, "fanout_http_requests_by_status{{status=\"{class}\"}} {value}");
        }
        metric(&mut out, "http_request_latency_avg_us", "Average request latency", "gauge", s.http_request_latency_avg_us);
        metric(&mut out, "http_rate_limited_total", "Requests rejected by the rate limiter", "counter", s.http_rate_limited);

        metric(&mut out, "store_ops_total", "Entity service operations", "counter", s.store_ops_total);
        metric(&mut out, "store_errors_total", "Entity service errors", "counter", s.store_errors_total);
        metric(&mut out, "store_op_avg_time_us", "Average entity service latency", "gauge", s.store_op_avg_time_us);

        out.push_str("# HELP fanout_cache_hit_rate Counts cache hit rate\n");
        out.push_str("# TYPE fanout_cache_hit_rate gauge\n");
        let _ = writeln!(out, "fanout_cache_hit_rate {:.4}", s.cache_hit_rate);

        metric(&mut out, "changes_propagated_total", "State changes published", "counter", s.changes_propagated);
        metric(&mut out, "changes_propagate_failed_total", "State changes that failed to publish", "counter", s.changes_propagate_failed);
        metric(&mut out, "changes_consumed_total", "State changes consumed", "counter", s.changes_consumed);
        metric(&mut out, "changes_acked_total", "State changes acknowledged", "counter", s.changes_acked);
        metric(&mut out, "messages_rendered_total", "Pipeline messages rendered", "counter", s.messages_rendered);
        metric(&mut out, "pipeline_failures_total", "Pipeline runs that failed", "counter", s.pipeline_failures);

        out
    }
}

fn metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP fanout_{name} {help}");
    let _ = writeln!(out, "# TYPE fanout_{name} {kind}");
    let _ = writeln!(out, "fanout_{name} {value}");
}

const fn average(total: u64, count: u64) -> u64 {
    if count > 0 { total / count } else { 0 }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub http_requests_total: u64,
    pub http_requests_2xx: u64,
    pub http_requests_4xx: u64,
    pub http_requests_5xx: u64,
    pub http_request_latency_avg_us: u64,
    pub http_rate_limited: u64,
    pub store_ops_total: u64,
    pub store_errors_total: u64,
    pub store_op_avg_time_us: u64,
    pub cache_hit_rate: f64,
    pub changes_propagated: u64,
    pub changes_propagate_failed: u64,
    pub changes_consumed: u64,
    pub changes_acked: u64,
    pub messages_rendered: u64,
    pub pipeline_failures: u64,
}

/// Timer guard for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
