//! Declarative pass/fail thresholds, evaluated once after the run.
//!
//! Each scenario tag carries its own bounds: a P99 latency ceiling and
//! maximum transport-failure and assertion-failure rates. Nothing is
//! enforced mid-run; the evaluation result drives the process exit code
//! so CI pipelines fail on a degraded or contract-violating service.

use serde::{Deserialize, Serialize};

use crate::config::SuiteConfig;
use crate::metrics::MetricsSnapshot;

/// Per-scenario bounds. Defaults mirror the canonical suites:
/// `p(99) < 1000ms` and failure rate `< 0.01`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Thresholds {
    /// P99 success latency must stay below this bound (milliseconds).
    #[serde(default = "default_p99_ms")]
    pub p99_ms: u64,
    /// Transport-failure rate must stay below this fraction.
    #[serde(default = "default_rate")]
    pub max_failure_rate: f64,
    /// Assertion-failure rate must stay below this fraction.
    #[serde(default = "default_rate")]
    pub max_assertion_rate: f64,
}

fn default_p99_ms() -> u64 {
    1000
}

fn default_rate() -> f64 {
    0.01
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p99_ms: default_p99_ms(),
            max_failure_rate: default_rate(),
            max_assertion_rate: default_rate(),
        }
    }
}

/// One evaluated bound.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdCheck {
    /// Human-readable bound, e.g. `"p(99) < 1000ms"`.
    pub name: String,
    /// Observed value rendered for the summary and report.
    pub actual: String,
    pub passed: bool,
}

/// All evaluated bounds for one scenario tag.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioVerdict {
    pub scenario: String,
    pub checks: Vec<ThresholdCheck>,
}

impl ScenarioVerdict {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Evaluate every scenario's thresholds against the final snapshot.
///
/// A scenario that recorded no samples fails outright: a run that never
/// issued traffic for a configured scenario must not pass silently.
pub fn evaluate(snapshot: &MetricsSnapshot, config: &SuiteConfig) -> Vec<ScenarioVerdict> {
    config
        .scenario
        .iter()
        .map(|sc| {
            let bounds = sc.thresholds;
            let tag = snapshot
                .per_scenario
                .iter()
                .find(|t| t.scenario == sc.name);

            let checks = match tag {
                Some(tag) => vec![
                    ThresholdCheck {
                        name: format!("p(99) < {}ms", bounds.p99_ms),
                        actual: format!("p(99)={}ms", tag.p99),
                        passed: tag.p99 < bounds.p99_ms,
                    },
                    ThresholdCheck {
                        name: format!("failed rate < {}", bounds.max_failure_rate),
                        actual: format!("rate={:.4}", tag.error_rate),
                        passed: tag.error_rate < bounds.max_failure_rate,
                    },
                    ThresholdCheck {
                        name: format!("assertion rate < {}", bounds.max_assertion_rate),
                        actual: format!("rate={:.4}", tag.assertion_rate),
                        passed: tag.assertion_rate < bounds.max_assertion_rate,
                    },
                ],
                None => vec![ThresholdCheck {
                    name: "samples recorded > 0".to_string(),
                    actual: "no samples".to_string(),
                    passed: false,
                }],
            };

            ScenarioVerdict {
                scenario: sc.name.clone(),
                checks,
            }
        })
        .collect()
}

/// `true` when every scenario passed every bound.
pub fn all_passed(verdicts: &[ScenarioVerdict]) -> bool {
    verdicts.iter().all(|v| v.passed())
}
