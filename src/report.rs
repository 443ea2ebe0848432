//! JSON report serialization for suite results.
//!
//! Produces a schema-versioned JSON report with counters, latency
//! percentiles, per-scenario breakdowns, threshold verdicts, and the
//! resolved configuration for reproducibility. Designed for CI/CD
//! pipeline consumption.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::SuiteConfig;
use crate::engine::SuiteResult;
use crate::metrics::CounterSnapshot;
use crate::thresholds::ScenarioVerdict;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
/// External tools key on this field to determine parser compatibility.
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON report structure.
///
/// Self-contained: anyone reading just the JSON file should understand
/// what was run and how it went.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    /// Report format version for parser compatibility.
    pub schema_version: String,
    /// ISO-8601 timestamp when the report was generated.
    pub timestamp: String,
    /// Target QMS address that was tested.
    pub target_url: String,
    /// Actual run duration in seconds.
    pub duration_secs: f64,
    /// Whether every scenario passed every threshold.
    pub passed: bool,
    /// Full resolved suite configuration (with CLI overrides applied).
    pub config: serde_json::Value,
    /// Final values of the process-wide counters.
    pub counters: CounterSnapshot,
    /// Aggregate performance metrics.
    pub metrics: ReportMetrics,
    /// Transport-error counts by classification.
    pub errors: HashMap<String, u64>,
    /// Per-scenario metrics keyed by scenario tag.
    pub per_scenario: HashMap<String, ScenarioReportMetrics>,
    /// Threshold verdicts per scenario.
    pub thresholds: Vec<ThresholdReport>,
}

/// Aggregate performance metrics in the report.
#[derive(Debug, Serialize)]
pub struct ReportMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Transport failure rate as a fraction (0.0..=1.0).
    pub error_rate: f64,
    /// Throughput in requests per second.
    pub throughput_rps: f64,
    /// Latency percentile breakdown.
    pub latency: LatencyMetrics,
    /// Per-operation request counts (keys are operation names).
    pub operation_counts: HashMap<String, u64>,
    /// Per-operation transport-error counts.
    pub operation_errors: HashMap<String, u64>,
}

/// Latency percentile metrics in milliseconds.
#[derive(Debug, Serialize)]
pub struct LatencyMetrics {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Per-scenario metrics for JSON report output.
#[derive(Debug, Serialize)]
pub struct ScenarioReportMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub assertion_failures: u64,
    pub assertion_rate: f64,
    pub latency: LatencyMetrics,
    /// Sample of violated predicates (capped).
    pub violated_expectations: Vec<String>,
}

/// Threshold verdict for one scenario in the report.
#[derive(Debug, Serialize)]
pub struct ThresholdReport {
    pub scenario: String,
    pub passed: bool,
    pub checks: Vec<ThresholdCheckReport>,
}

/// One evaluated bound in the report.
#[derive(Debug, Serialize)]
pub struct ThresholdCheckReport {
    pub name: String,
    pub actual: String,
    pub passed: bool,
}

impl SuiteReport {
    /// Build a report from suite results, verdicts, config, and target.
    pub fn from_result(
        result: &SuiteResult,
        config: &SuiteConfig,
        verdicts: &[ScenarioVerdict],
        url: &str,
    ) -> Self {
        let snap = &result.snapshot;
        let elapsed_secs = result.elapsed.as_secs_f64();
        let throughput_rps = if elapsed_secs > 0.0 {
            snap.total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        let operation_counts: HashMap<String, u64> = snap
            .operation_counts
            .iter()
            .map(|(op, count)| (op.to_string(), *count))
            .collect();
        let operation_errors: HashMap<String, u64> = snap
            .per_operation_errors
            .iter()
            .map(|(op, count)| (op.to_string(), *count))
            .collect();

        let per_scenario: HashMap<String, ScenarioReportMetrics> = snap
            .per_scenario
            .iter()
            .map(|tag| {
                (
                    tag.scenario.clone(),
                    ScenarioReportMetrics {
                        total_requests: tag.total_requests,
                        success_count: tag.success_count,
                        error_count: tag.error_count,
                        error_rate: tag.error_rate,
                        assertion_failures: tag.assertion_failures,
                        assertion_rate: tag.assertion_rate,
                        latency: LatencyMetrics {
                            p50_ms: tag.p50,
                            p95_ms: tag.p95,
                            p99_ms: tag.p99,
                        },
                        violated_expectations: tag.failure_details.clone(),
                    },
                )
            })
            .collect();

        let thresholds: Vec<ThresholdReport> = verdicts
            .iter()
            .map(|v| ThresholdReport {
                scenario: v.scenario.clone(),
                passed: v.passed(),
                checks: v
                    .checks
                    .iter()
                    .map(|c| ThresholdCheckReport {
                        name: c.name.clone(),
                        actual: c.actual.clone(),
                        passed: c.passed,
                    })
                    .collect(),
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            target_url: url.to_string(),
            duration_secs: elapsed_secs,
            passed: thresholds.iter().all(|t| t.passed),
            config: serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
            counters: result.counters,
            metrics: ReportMetrics {
                total_requests: snap.total_requests,
                success_count: snap.success_count,
                error_count: snap.error_count,
                error_rate: snap.error_rate,
                throughput_rps,
                latency: LatencyMetrics {
                    p50_ms: snap.p50,
                    p95_ms: snap.p95,
                    p99_ms: snap.p99,
                },
                operation_counts,
                operation_errors,
            },
            errors: snap.error_category_counts.clone(),
            per_scenario,
            thresholds,
        }
    }
}

/// Write a JSON report file to the `reports/` directory under `base_dir`.
///
/// Creates the directory if it does not exist. The filename is
/// timestamped: `qms-tester-YYYY-MM-DDTHH-MM-SS.json` (hyphens, not
/// colons, for Windows compatibility).
///
/// Returns the path to the written report file.
pub fn write_report(report: &SuiteReport, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
    let reports_dir = base_dir.join("reports");
    if !reports_dir.exists() {
        std::fs::create_dir_all(&reports_dir)?;
    }

    let report_path = reports_dir.join(report_filename(&chrono::Utc::now()));
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(&report_path, json)?;

    Ok(report_path)
}

/// Generate the report filename for a given timestamp.
///
/// Exposed for testing. Uses hyphens instead of colons for
/// cross-platform filename compatibility.
pub fn report_filename(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    format!("qms-tester-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSnapshot, OperationType, TagSnapshot};
    use crate::thresholds;
    use std::time::Duration;

    fn test_result() -> SuiteResult {
        SuiteResult {
            snapshot: MetricsSnapshot {
                p50: 42,
                p95: 120,
                p99: 350,
                success_count: 950,
                error_count: 50,
                total_requests: 1000,
                error_rate: 0.05,
                operation_counts: HashMap::from([(OperationType::Allow, 1000)]),
                per_operation_errors: HashMap::from([(OperationType::Allow, 50)]),
                error_category_counts: HashMap::from([
                    ("timeout".to_string(), 30),
                    ("connection".to_string(), 20),
                ]),
                per_scenario: vec![TagSnapshot {
                    scenario: "stress".to_string(),
                    p50: 42,
                    p95: 120,
                    p99: 350,
                    total_requests: 1000,
                    success_count: 950,
                    error_count: 50,
                    error_rate: 0.05,
                    assertion_failures: 0,
                    assertion_rate: 0.0,
                    failure_details: Vec::new(),
                }],
            },
            counters: CounterSnapshot {
                request_total: 1000,
                request_failure_total: 50,
                request_allowed_total: 800,
            },
            elapsed: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_report_schema_and_target() {
        let config = SuiteConfig::sharded_suite();
        let result = test_result();
        let verdicts = thresholds::evaluate(&result.snapshot, &config);
        let report = SuiteReport::from_result(&result, &config, &verdicts, "localhost:6789");
        assert_eq!(report.schema_version, "1.0");
        assert_eq!(report.target_url, "localhost:6789");
        assert!((report.duration_secs - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_report_counters_and_metrics() {
        let config = SuiteConfig::sharded_suite();
        let result = test_result();
        let verdicts = thresholds::evaluate(&result.snapshot, &config);
        let report = SuiteReport::from_result(&result, &config, &verdicts, "localhost:6789");

        assert_eq!(report.counters.request_total, 1000);
        assert_eq!(report.counters.request_allowed_total, 800);
        assert_eq!(report.metrics.operation_counts.get("allow"), Some(&1000));
        assert!((report.metrics.throughput_rps - 16.666).abs() < 0.1);
        assert_eq!(report.errors.get("timeout"), Some(&30));
    }

    #[test]
    fn test_report_overall_pass_reflects_thresholds() {
        let config = SuiteConfig::sharded_suite();
        let result = test_result();
        let verdicts = thresholds::evaluate(&result.snapshot, &config);
        let report = SuiteReport::from_result(&result, &config, &verdicts, "localhost:6789");
        // 5% failure rate breaches the default 1% bound.
        assert!(!report.passed);
        assert!(!report.thresholds[0].passed);
    }

    #[test]
    fn test_report_serializes_to_valid_json() {
        let config = SuiteConfig::sharded_suite();
        let result = test_result();
        let verdicts = thresholds::evaluate(&result.snapshot, &config);
        let report = SuiteReport::from_result(&result, &config, &verdicts, "localhost:6789");

        let json = serde_json::to_string_pretty(&report).expect("should serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("should parse back");

        assert_eq!(parsed["schema_version"], "1.0");
        assert!(parsed["timestamp"].is_string());
        assert!(parsed["metrics"]["latency"]["p50_ms"].is_u64());
        assert!(parsed["per_scenario"]["stress"]["total_requests"].is_u64());
        assert!(parsed["config"]["scenario"].is_array());
        assert_eq!(parsed["counters"]["request_total"], 1000);
    }

    #[test]
    fn test_report_filename_has_no_colons() {
        let ts = chrono::Utc::now();
        let filename = report_filename(&ts);
        assert!(filename.starts_with("qms-tester-"));
        assert!(filename.ends_with(".json"));
        assert!(!filename.contains(':'), "filename: {filename}");
    }

    #[test]
    fn test_write_report_creates_directory_and_file() {
        let config = SuiteConfig::sharded_suite();
        let result = test_result();
        let verdicts = thresholds::evaluate(&result.snapshot, &config);
        let report = SuiteReport::from_result(&result, &config, &verdicts, "localhost:6789");

        let tmp_dir = tempfile::tempdir().expect("should create temp dir");
        let reports_dir = tmp_dir.path().join("reports");
        assert!(!reports_dir.exists());

        let path = write_report(&report, tmp_dir.path()).expect("write should succeed");
        assert!(path.exists());
        assert!(reports_dir.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["schema_version"], "1.0");
    }
}
