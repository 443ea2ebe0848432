//! k6-style terminal summary renderer for suite results.
//!
//! Produces a colorized, human-readable summary with:
//! - ASCII art header with target and schedule
//! - Dotted-line metric rows (metric.........: value)
//! - The three run counters
//! - Per-scenario latency, failure, and assertion breakdown
//! - Threshold verdicts
//!
//! The renderer is a pure function: [`render_summary`] takes structured
//! data and returns a formatted [`String`]. No I/O, no side effects.
//! Color coding goes through the `colored` crate, which respects the
//! global override set when `--no-color` is active or stdout is piped.

use colored::Colorize;

use crate::config::SuiteConfig;
use crate::engine::SuiteResult;
use crate::thresholds::ScenarioVerdict;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 40;

/// Render the full terminal summary.
pub fn render_summary(
    result: &SuiteResult,
    config: &SuiteConfig,
    url: &str,
    verdicts: &[ScenarioVerdict],
) -> String {
    let snap = &result.snapshot;
    let elapsed_secs = result.elapsed.as_secs_f64();
    let mut lines = Vec::new();

    lines.push(render_header(url, config));

    // Run counters, named after the original metric taxonomy.
    lines.push(format_metric_row(
        "request_total",
        &result.counters.request_total.to_string(),
        PAD_WIDTH,
    ));
    let failure_str = result.counters.request_failure_total.to_string();
    let failure_colored = if result.counters.request_failure_total > 0 {
        failure_str.red().to_string()
    } else {
        failure_str
    };
    lines.push(format_metric_row(
        "request_failure_total",
        &failure_colored,
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "request_allowed_total",
        &result
            .counters
            .request_allowed_total
            .to_string()
            .green()
            .to_string(),
        PAD_WIDTH,
    ));

    // Run-wide latency and throughput.
    let latency_value = format!("p50={}ms  p95={}ms  p99={}ms", snap.p50, snap.p95, snap.p99);
    let latency_colored = if snap.p99 < 1000 {
        latency_value.green().to_string()
    } else {
        latency_value.yellow().to_string()
    };
    lines.push(format_metric_row(
        "http_req_duration",
        &latency_colored,
        PAD_WIDTH,
    ));

    let throughput = if elapsed_secs > 0.0 {
        snap.total_requests as f64 / elapsed_secs
    } else {
        0.0
    };
    lines.push(format_metric_row(
        "http_req_rate",
        &format!("{throughput:.1} req/s").green().to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "http_req_elapsed",
        &format!("{elapsed_secs:.1}s"),
        PAD_WIDTH,
    ));

    // Transport error breakdown (only when errors exist).
    if !snap.error_category_counts.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut categories: Vec<_> = snap.error_category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("    {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    // Per-scenario table.
    if !snap.per_scenario.is_empty() {
        lines.push(String::new());
        lines.push("  per-scenario metrics:".to_string());
        lines.push(String::new());
        lines.push(format!(
            "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "scenario", "reqs", "fail%", "asserts", "p50", "p95", "p99"
        ));
        lines.push(format!("  {}", "\u{2500}".repeat(70)));

        for tag in &snap.per_scenario {
            let fail_pct = tag.error_rate * 100.0;
            let fail_str = format!("{fail_pct:.1}%");
            let fail_colored = if fail_pct > 5.0 {
                fail_str.red().to_string()
            } else if fail_pct > 1.0 {
                fail_str.yellow().to_string()
            } else {
                fail_str.green().to_string()
            };

            let assert_str = tag.assertion_failures.to_string();
            let assert_colored = if tag.assertion_failures > 0 {
                assert_str.red().to_string()
            } else {
                assert_str
            };

            let p99_str = format!("{}ms", tag.p99);
            let p99_colored = if tag.p99 > 1000 {
                p99_str.yellow().to_string()
            } else {
                p99_str.green().to_string()
            };

            lines.push(format!(
                "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                tag.scenario,
                tag.total_requests,
                fail_colored,
                assert_colored,
                format!("{}ms", tag.p50),
                format!("{}ms", tag.p95),
                p99_colored,
            ));
        }
    }

    // Violated predicates, for diagnosis.
    let violated: Vec<_> = snap
        .per_scenario
        .iter()
        .filter(|t| !t.failure_details.is_empty())
        .collect();
    if !violated.is_empty() {
        lines.push(String::new());
        lines.push("  violated expectations:".to_string());
        for tag in violated {
            for detail in &tag.failure_details {
                lines.push(format!("    {} {}: {}", "x".red(), tag.scenario, detail));
            }
        }
    }

    // Threshold verdicts.
    lines.push(String::new());
    lines.push("  thresholds:".to_string());
    for verdict in verdicts {
        for check in &verdict.checks {
            let mark = if check.passed {
                "\u{2713}".green().to_string()
            } else {
                "\u{2717}".red().to_string()
            };
            lines.push(format!(
                "    {} {{scenario:{}}} {} ({})",
                mark, verdict.scenario, check.name, check.actual
            ));
        }
    }

    lines.join("\n")
}

/// Render the ASCII art header with the run configuration.
fn render_header(url: &str, config: &SuiteConfig) -> String {
    let names: Vec<&str> = config.scenario.iter().map(|s| s.name.as_str()).collect();
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:    {}
   /  \/      \   |  scenarios: {}
  /    \       \  |  schedule:  {}s
 /      \       \ |  timeout:   {}ms
"#,
        "qms-tester".bold(),
        url,
        names.join(", "),
        config.total_duration_secs(),
        config.settings.timeout_ms,
    )
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}
