//! Run counters and the HdrHistogram-based metrics pipeline.
//!
//! Two layers of accounting:
//!
//! - [`RunCounters`]: three process-wide monotonic counters
//!   (`request_total`, `request_failure_total`, `request_allowed_total`)
//!   incremented from many virtual users concurrently. Atomic, never
//!   reset mid-run, read at run completion.
//! - [`MetricsRecorder`]: single-owner latency recorder fed
//!   [`RequestSample`] values over an mpsc channel by the engine's
//!   aggregator task. Success and error latencies live in separate
//!   histograms so error spikes don't pollute success percentiles, and
//!   every sample is also bucketed under its scenario tag for post-run
//!   threshold evaluation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

use crate::error::RequestError;

/// Cap on violated-predicate strings retained per scenario tag.
const MAX_FAILURE_DETAILS: usize = 20;

/// The QMS operation (or SUT ping) a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Allow,
    Alloc,
    Free,
    View,
    /// Secondary `GET /api/v1/ping` against the system under test.
    Ping,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::Alloc => "alloc",
            Self::Free => "free",
            Self::View => "view",
            Self::Ping => "ping",
        };
        f.write_str(s)
    }
}

/// Process-wide monotonic counters, clone-friendly for sharing across
/// virtual users.
#[derive(Clone, Default)]
pub struct RunCounters(Arc<CounterCells>);

#[derive(Default)]
struct CounterCells {
    request_total: AtomicU64,
    request_failure_total: AtomicU64,
    request_allowed_total: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one issued QMS request.
    pub fn incr_request(&self) {
        self.0.request_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one harness-level failure (transport error or non-200).
    pub fn incr_failure(&self) {
        self.0.request_failure_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one granted `allow` (ok with zero wait).
    pub fn incr_allowed(&self) {
        self.0.request_allowed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all three counters at once.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            request_total: self.0.request_total.load(Ordering::Relaxed),
            request_failure_total: self.0.request_failure_total.load(Ordering::Relaxed),
            request_allowed_total: self.0.request_allowed_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub request_total: u64,
    pub request_failure_total: u64,
    pub request_allowed_total: u64,
}

/// A single request measurement emitted by a virtual user.
pub struct RequestSample {
    /// Scenario tag the sample belongs to.
    pub scenario: String,
    /// Operation that was measured.
    pub operation: OperationType,
    /// Wall-clock duration of the request.
    pub duration: Duration,
    /// `Ok(())` for a transport-level success, `Err` otherwise.
    pub result: Result<(), RequestError>,
    /// Violated contract predicates, empty when the response passed.
    pub failed_checks: Vec<String>,
    /// When the sample was taken.
    pub timestamp: Instant,
}

impl RequestSample {
    /// A transport success with the given assertion outcome.
    pub fn success(
        scenario: &str,
        operation: OperationType,
        duration: Duration,
        failed_checks: Vec<String>,
    ) -> Self {
        Self {
            scenario: scenario.to_string(),
            operation,
            duration,
            result: Ok(()),
            failed_checks,
            timestamp: Instant::now(),
        }
    }

    /// A transport failure.
    pub fn error(
        scenario: &str,
        operation: OperationType,
        duration: Duration,
        err: RequestError,
    ) -> Self {
        Self {
            scenario: scenario.to_string(),
            operation,
            duration,
            result: Err(err),
            failed_checks: Vec::new(),
            timestamp: Instant::now(),
        }
    }
}

/// Per-scenario-tag histogram pair and assertion bookkeeping.
struct TagMetrics {
    success_histogram: Histogram<u64>,
    error_histogram: Histogram<u64>,
    assertion_failures: u64,
    assertions_checked: u64,
    /// First few violated predicates, for the summary and report.
    failure_details: Vec<String>,
}

impl TagMetrics {
    fn new() -> Self {
        Self {
            success_histogram: new_histogram(),
            error_histogram: new_histogram(),
            assertion_failures: 0,
            assertions_checked: 0,
            failure_details: Vec::new(),
        }
    }
}

fn new_histogram() -> Histogram<u64> {
    let mut h = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
    h.auto(true);
    h
}

fn percentile(h: &Histogram<u64>, q: f64) -> u64 {
    if h.is_empty() {
        return 0;
    }
    h.value_at_quantile(q)
}

/// Per-tag snapshot with latency percentiles and failure breakdown,
/// the unit thresholds are evaluated against.
#[derive(Debug, Clone)]
pub struct TagSnapshot {
    /// Scenario tag.
    pub scenario: String,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub total_requests: u64,
    pub success_count: u64,
    /// Transport failures (connection, timeout, non-200, bad body).
    pub error_count: u64,
    /// Transport failure rate as a fraction (0.0..=1.0).
    pub error_rate: f64,
    /// Responses that parsed but violated at least one predicate.
    pub assertion_failures: u64,
    /// Assertion failure rate over validated responses (0.0..=1.0).
    pub assertion_rate: f64,
    /// Sample of violated predicates (capped).
    pub failure_details: Vec<String>,
}

/// Point-in-time snapshot of all recorded metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_requests: u64,
    pub error_rate: f64,
    /// Per-operation total request counts.
    pub operation_counts: HashMap<OperationType, u64>,
    /// Per-operation transport-error counts.
    pub per_operation_errors: HashMap<OperationType, u64>,
    /// Transport-error counts by classification.
    pub error_category_counts: HashMap<String, u64>,
    /// Per-scenario-tag snapshots, sorted by tag for deterministic output.
    pub per_scenario: Vec<TagSnapshot>,
}

/// Single-owner latency recorder. The engine's aggregator task is the
/// only writer; virtual users reach it through an mpsc channel.
pub struct MetricsRecorder {
    success_histogram: Histogram<u64>,
    error_histogram: Histogram<u64>,
    operation_counts: HashMap<OperationType, u64>,
    error_counts: HashMap<OperationType, u64>,
    error_category_counts: HashMap<String, u64>,
    per_tag: HashMap<String, TagMetrics>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            success_histogram: new_histogram(),
            error_histogram: new_histogram(),
            operation_counts: HashMap::new(),
            error_counts: HashMap::new(),
            error_category_counts: HashMap::new(),
            per_tag: HashMap::new(),
        }
    }

    /// Record one sample into the run-wide and per-tag histograms.
    pub fn record(&mut self, sample: &RequestSample) {
        let ms = sample.duration.as_millis() as u64;
        *self.operation_counts.entry(sample.operation).or_insert(0) += 1;

        let tag = self
            .per_tag
            .entry(sample.scenario.clone())
            .or_insert_with(TagMetrics::new);

        match &sample.result {
            Ok(()) => {
                let _ = self.success_histogram.record(ms);
                let _ = tag.success_histogram.record(ms);
                tag.assertions_checked += 1;
                if !sample.failed_checks.is_empty() {
                    tag.assertion_failures += 1;
                    for check in &sample.failed_checks {
                        if tag.failure_details.len() >= MAX_FAILURE_DETAILS {
                            break;
                        }
                        if !tag.failure_details.contains(check) {
                            tag.failure_details.push(check.clone());
                        }
                    }
                }
            },
            Err(err) => {
                let _ = self.error_histogram.record(ms);
                let _ = tag.error_histogram.record(ms);
                *self.error_counts.entry(sample.operation).or_insert(0) += 1;
                *self
                    .error_category_counts
                    .entry(err.error_category().to_owned())
                    .or_insert(0) += 1;
            },
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_histogram.len() + self.error_histogram.len()
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.error_histogram.len() as f64 / total as f64
    }

    /// Total requests for a specific operation type (success + error).
    pub fn operation_count(&self, op: OperationType) -> u64 {
        self.operation_counts.get(&op).copied().unwrap_or(0)
    }

    /// Capture a self-contained snapshot that can cross threads without
    /// holding a reference to the recorder.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut per_scenario: Vec<TagSnapshot> = self
            .per_tag
            .iter()
            .map(|(name, tag)| {
                let success_count = tag.success_histogram.len();
                let error_count = tag.error_histogram.len();
                let total = success_count + error_count;
                let error_rate = if total == 0 {
                    0.0
                } else {
                    error_count as f64 / total as f64
                };
                let assertion_rate = if tag.assertions_checked == 0 {
                    0.0
                } else {
                    tag.assertion_failures as f64 / tag.assertions_checked as f64
                };
                TagSnapshot {
                    scenario: name.clone(),
                    p50: percentile(&tag.success_histogram, 0.50),
                    p95: percentile(&tag.success_histogram, 0.95),
                    p99: percentile(&tag.success_histogram, 0.99),
                    total_requests: total,
                    success_count,
                    error_count,
                    error_rate,
                    assertion_failures: tag.assertion_failures,
                    assertion_rate,
                    failure_details: tag.failure_details.clone(),
                }
            })
            .collect();
        per_scenario.sort_by(|a, b| a.scenario.cmp(&b.scenario));

        MetricsSnapshot {
            p50: percentile(&self.success_histogram, 0.50),
            p95: percentile(&self.success_histogram, 0.95),
            p99: percentile(&self.success_histogram, 0.99),
            success_count: self.success_histogram.len(),
            error_count: self.error_histogram.len(),
            total_requests: self.total_requests(),
            error_rate: self.error_rate(),
            operation_counts: self.operation_counts.clone(),
            per_operation_errors: self.error_counts.clone(),
            error_category_counts: self.error_category_counts.clone(),
            per_scenario,
        }
    }
}
