//! Prometheus-compatible metrics for the gatekeeper server.
//!
//! Tracks request counts, validation failures and decisions by verdict.

use gatekeeper_core::Verdict;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total HTTP requests served.
    http_requests_total: AtomicU64,
    /// Total HTTP errors (4xx + 5xx).
    http_errors_total: AtomicU64,
    /// Requests rejected with 400.
    validation_failures_total: AtomicU64,
    /// Decisions rendered through `POST /test`, indexed like `Verdict::ALL`.
    decisions_total: [AtomicU64; 4],
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                validation_failures_total: AtomicU64::new(0),
                decisions_total: Default::default(),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_validation_failures(&self) {
        self.inner
            .validation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decision(&self, verdict: Verdict) {
        self.inner.decisions_total[slot(verdict)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        let mut out = format!(
            r#"# HELP gatekeeper_uptime_seconds Time since the server started.
# TYPE gatekeeper_uptime_seconds gauge
gatekeeper_uptime_seconds {}

# HELP gatekeeper_http_requests_total Total HTTP requests served.
# TYPE gatekeeper_http_requests_total counter
gatekeeper_http_requests_total {}

# HELP gatekeeper_http_errors_total Total HTTP errors (4xx/5xx).
# TYPE gatekeeper_http_errors_total counter
gatekeeper_http_errors_total {}

# HELP gatekeeper_validation_failures_total Requests rejected as invalid input (400).
# TYPE gatekeeper_validation_failures_total counter
gatekeeper_validation_failures_total {}

# HELP gatekeeper_decisions_total Decisions rendered, by verdict.
# TYPE gatekeeper_decisions_total counter
"#,
            self.uptime_secs(),
            m.http_requests_total.load(Ordering::Relaxed),
            m.http_errors_total.load(Ordering::Relaxed),
            m.validation_failures_total.load(Ordering::Relaxed),
        );
        for verdict in Verdict::ALL {
            out.push_str(&format!(
                "gatekeeper_decisions_total{{decision=\"{}\"}} {}\n",
                verdict.as_str(),
                m.decisions_total[slot(verdict)].load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(verdict: Verdict) -> usize {
    match verdict {
        Verdict::Execute => 0,
        Verdict::Suggest => 1,
        Verdict::LogOnly => 2,
        Verdict::Block => 3,
    }
}
