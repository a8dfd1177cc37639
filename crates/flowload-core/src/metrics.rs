//! In-process metrics registry
//!
//! Explicitly constructed and shared by `Arc` across sessions; the harness
//! reads a snapshot at the end of a run and tests assert on it directly.
//! Counters and gauges are keyed by (instrument, label) pairs under a single
//! short-held lock. Durations accumulate count/total/max so averages can be
//! reported without keeping every observation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Key for one labelled instrument series
type SeriesKey = (&'static str, String);

/// Accumulated duration statistics for one operation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DurationStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl DurationStats {
    fn observe(&mut self, d: Duration) {
        self.count += 1;
        self.total += d;
        if d > self.max {
            self.max = d;
        }
    }

    /// Mean observed duration, zero when nothing was observed
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    counters: HashMap<SeriesKey, u64>,
    gauges: HashMap<SeriesKey, f64>,
    durations: HashMap<SeriesKey, DurationStats>,
}

/// Read-only copy of the registry contents
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<SeriesKey, u64>,
    pub gauges: HashMap<SeriesKey, f64>,
    pub durations: HashMap<SeriesKey, DurationStats>,
}

impl MetricsSnapshot {
    /// Counter value for (instrument, label), zero when never incremented
    pub fn counter(&self, name: &'static str, label: &str) -> u64 {
        self.counters
            .get(&(name, label.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a counter across all labels
    pub fn counter_total(&self, name: &'static str) -> u64 {
        self.counters
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, v)| v)
            .sum()
    }

    /// Gauge value for (instrument, label)
    pub fn gauge(&self, name: &'static str, label: &str) -> Option<f64> {
        self.gauges.get(&(name, label.to_string())).copied()
    }
}

// Instrument names (also the keys in the end-of-run summary)
pub const REQUESTS: &str = "requests";
pub const AUTH_ATTEMPTS: &str = "auth_attempts";
pub const CHUNK_UPLOADS: &str = "chunk_uploads";
pub const FLOW_CREATIONS: &str = "flow_creations";
pub const VALIDATION_RESULTS: &str = "validation_results";
pub const ACTIVE_SESSIONS: &str = "active_sessions";
pub const CHUNKS_IN_PROGRESS: &str = "chunks_in_progress";
pub const UPLOAD_PROGRESS: &str = "upload_progress";
pub const SESSION_STATUS: &str = "session_status";
pub const EXPECTED_ROWS: &str = "expected_rows";
pub const DB_ROW_COUNT: &str = "db_row_count";
pub const REQUEST_DURATION: &str = "request_duration";
pub const AUTH_DURATION: &str = "auth_duration";
pub const CHUNK_UPLOAD_DURATION: &str = "chunk_upload_duration";
pub const FLOW_PROCESSING_DURATION: &str = "flow_processing_duration";

/// Shared metrics registry
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<MetricsInner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner(&self, f: impl FnOnce(&mut MetricsInner)) {
        // A poisoned metrics lock means a panic mid-update; metrics are
        // best-effort observability, keep going with the existing values.
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut inner);
    }

    fn inc_counter(&self, name: &'static str, label: String) {
        self.with_inner(|inner| {
            *inner.counters.entry((name, label)).or_insert(0) += 1;
        });
    }

    fn set_gauge(&self, name: &'static str, label: String, value: f64) {
        self.with_inner(|inner| {
            inner.gauges.insert((name, label), value);
        });
    }

    fn add_gauge(&self, name: &'static str, label: String, delta: f64) {
        self.with_inner(|inner| {
            *inner.gauges.entry((name, label)).or_insert(0.0) += delta;
        });
    }

    fn observe(&self, name: &'static str, label: String, d: Duration) {
        self.with_inner(|inner| {
            inner.durations.entry((name, label)).or_default().observe(d);
        });
    }

    // ------------------------------------------------------------------
    // Request executor instruments
    // ------------------------------------------------------------------

    /// Count one request outcome by method, endpoint name, and status
    /// (`"error"` for transport failures)
    pub fn record_request(&self, method: &str, endpoint: &str, status: &str) {
        self.inc_counter(REQUESTS, format!("{method}:{endpoint}:{status}"));
    }

    /// Record the latency of a successful request
    pub fn record_request_duration(&self, method: &str, endpoint: &str, d: Duration) {
        self.observe(REQUEST_DURATION, format!("{method}:{endpoint}"), d);
    }

    // ------------------------------------------------------------------
    // Auth / session instruments
    // ------------------------------------------------------------------

    pub fn record_auth_attempt(&self, username: &str, success: bool) {
        self.inc_counter(AUTH_ATTEMPTS, format!("{username}:{success}"));
    }

    pub fn record_auth_duration(&self, d: Duration) {
        self.observe(AUTH_DURATION, String::new(), d);
    }

    pub fn set_session_status(&self, username: &str, logged_in: bool) {
        self.set_gauge(
            SESSION_STATUS,
            username.to_string(),
            if logged_in { 1.0 } else { 0.0 },
        );
    }

    pub fn session_started(&self) {
        self.add_gauge(ACTIVE_SESSIONS, String::new(), 1.0);
    }

    pub fn session_stopped(&self) {
        self.add_gauge(ACTIVE_SESSIONS, String::new(), -1.0);
    }

    // ------------------------------------------------------------------
    // Flow / upload instruments
    // ------------------------------------------------------------------

    pub fn record_flow_creation(&self, success: bool) {
        self.inc_counter(
            FLOW_CREATIONS,
            if success { "success" } else { "failed" }.to_string(),
        );
    }

    pub fn record_chunk_upload(&self, flow_id: u64, success: bool) {
        self.inc_counter(
            CHUNK_UPLOADS,
            format!("{flow_id}:{}", if success { "success" } else { "failed" }),
        );
    }

    pub fn record_chunk_upload_duration(&self, d: Duration) {
        self.observe(CHUNK_UPLOAD_DURATION, String::new(), d);
    }

    pub fn upload_started(&self) {
        self.add_gauge(CHUNKS_IN_PROGRESS, String::new(), 1.0);
    }

    pub fn upload_finished(&self) {
        self.add_gauge(CHUNKS_IN_PROGRESS, String::new(), -1.0);
    }

    pub fn set_upload_progress(&self, flow_id: u64, percent: f64) {
        self.set_gauge(UPLOAD_PROGRESS, flow_id.to_string(), percent);
    }

    pub fn record_flow_processing_duration(&self, d: Duration) {
        self.observe(FLOW_PROCESSING_DURATION, String::new(), d);
    }

    // ------------------------------------------------------------------
    // Validation instruments
    // ------------------------------------------------------------------

    pub fn record_validation(&self, passed: bool) {
        self.inc_counter(
            VALIDATION_RESULTS,
            if passed { "pass" } else { "fail" }.to_string(),
        );
    }

    pub fn set_expected_rows(&self, rows: u64) {
        self.set_gauge(EXPECTED_ROWS, String::new(), rows as f64);
    }

    pub fn set_db_row_count(&self, table: &str, rows: u64) {
        self.set_gauge(DB_ROW_COUNT, table.to_string(), rows as f64);
    }

    /// Copy out the current registry contents
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            durations: inner.durations.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_label() {
        let metrics = MetricsRegistry::new();
        metrics.record_request("POST", "Create flow", "201");
        metrics.record_request("POST", "Create flow", "201");
        metrics.record_request("POST", "Create flow", "503");

        let snap = metrics.snapshot();
        assert_eq!(snap.counter(REQUESTS, "POST:Create flow:201"), 2);
        assert_eq!(snap.counter(REQUESTS, "POST:Create flow:503"), 1);
        assert_eq!(snap.counter_total(REQUESTS), 3);
    }

    #[test]
    fn test_session_gauge_brackets() {
        let metrics = MetricsRegistry::new();
        metrics.session_started();
        metrics.session_started();
        metrics.session_stopped();

        let snap = metrics.snapshot();
        assert_eq!(snap.gauge(ACTIVE_SESSIONS, ""), Some(1.0));
    }

    #[test]
    fn test_duration_stats() {
        let metrics = MetricsRegistry::new();
        metrics.record_chunk_upload_duration(Duration::from_millis(100));
        metrics.record_chunk_upload_duration(Duration::from_millis(300));

        let snap = metrics.snapshot();
        let stats = snap.durations[&(CHUNK_UPLOAD_DURATION, String::new())];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max, Duration::from_millis(300));
        assert_eq!(stats.mean(), Duration::from_millis(200));
    }

    #[test]
    fn test_upload_progress_gauge_overwrites() {
        let metrics = MetricsRegistry::new();
        metrics.set_upload_progress(100001, 33.3);
        metrics.set_upload_progress(100001, 66.6);

        let snap = metrics.snapshot();
        assert_eq!(snap.gauge(UPLOAD_PROGRESS, "100001"), Some(66.6));
    }
}
