//! QMS Testing Library
//!
//! Load- and correctness-test harness for a Quota Management Service
//! (QMS). Usable as both a standalone CLI tool (`qms-tester`) and as a
//! library.
//!
//! The harness drives concurrent, time-varying traffic at the four QMS
//! endpoints (`allow`, `alloc`, `free`, `view`), asserts every response
//! against the versioned JSON contract, and aggregates counters, latency
//! percentiles, and declarative per-scenario thresholds.
//!
//! # Examples
//!
//! ## Run a built-in suite
//!
//! ```no_run
//! use qms_tester::{run_suite, SuiteConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SuiteConfig::rate_suite();
//!     let outcome = run_suite(config, "localhost:6789", Some("localhost:8080")).await?;
//!     if !outcome.passed {
//!         anyhow::bail!("thresholds failed");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Load a suite from TOML
//!
//! ```no_run
//! use qms_tester::SuiteConfig;
//!
//! fn load() -> Result<SuiteConfig, qms_tester::HarnessError> {
//!     SuiteConfig::load(std::path::Path::new("qms-tester.toml"))
//! }
//! ```

pub mod client;
pub mod config;
pub mod contract;
pub mod display;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod report;
pub mod request;
pub mod scenario;
pub mod summary;
pub mod thresholds;
pub mod vu;

// Re-export commonly used types
pub use client::QmsClient;
pub use config::{ExecKind, ExecutorKind, ScenarioConfig, Stage, SuiteConfig};
pub use contract::{Envelope, Expectation, Verdict};
pub use engine::{SuiteEngine, SuiteResult};
pub use error::{HarnessError, RequestError};
pub use metrics::{CounterSnapshot, MetricsSnapshot, RunCounters};
pub use scenario::ScenarioExecutor;
pub use thresholds::{ScenarioVerdict, Thresholds};

use anyhow::{Context, Result};

/// Outcome of [`run_suite`]: the raw result plus evaluated thresholds.
pub struct SuiteOutcome {
    pub result: SuiteResult,
    pub verdicts: Vec<ScenarioVerdict>,
    /// `true` when every scenario passed every threshold.
    pub passed: bool,
}

/// Run a suite against the given addresses and evaluate its thresholds.
///
/// This is the library entry point the CLI wraps: it builds the client,
/// runs the engine without a live display, and evaluates per-scenario
/// thresholds on the final snapshot.
pub async fn run_suite(
    config: SuiteConfig,
    qms_addr: &str,
    sut_addr: Option<&str>,
) -> Result<SuiteOutcome> {
    let client = QmsClient::new(qms_addr, sut_addr, config.settings.timeout_as_duration())
        .context("failed to build QMS client")?;

    let engine = SuiteEngine::new(config, client);
    let result = engine.run().await.context("suite run failed")?;

    let verdicts = thresholds::evaluate(&result.snapshot, engine.config());
    let passed = thresholds::all_passed(&verdicts);

    Ok(SuiteOutcome {
        result,
        verdicts,
        passed,
    })
}
