//! qms-tester: load and contract testing for the Quota Management Service.
//!
//! Drives the QMS `allow`/`alloc`/`free`/`view` endpoints with named,
//! independently scheduled scenarios, validates every response against
//! the versioned JSON contract, and fails the process when declarative
//! thresholds are breached.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qms_tester::config::SuiteConfig;
use qms_tester::engine::SuiteEngine;
use qms_tester::report::{write_report, SuiteReport};
use qms_tester::summary::render_summary;
use qms_tester::{thresholds, QmsClient};

/// Default config filename discovered in the working directory.
const CONFIG_FILENAME: &str = "qms-tester.toml";

/// Load and contract testing tool for the Quota Management Service
#[derive(Parser)]
#[command(name = "qms-tester")]
#[command(about = "Drive load and contract tests against a QMS deployment", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test suite against a QMS deployment
    ///
    /// Loads the suite from qms-tester.toml (or a built-in preset),
    /// drives the configured scenarios, prints a summary, writes a JSON
    /// report to reports/, and exits non-zero when thresholds fail.
    Run {
        /// QMS address (host:port or full URL)
        #[arg(long, env = "QMS_ADDR")]
        qms_addr: String,

        /// System-under-test address for the post-grant ping
        #[arg(long, env = "SUT_ADDR")]
        sut_addr: Option<String>,

        /// Path to a suite config file (default: discover ./qms-tester.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Built-in suite preset when no config file is used
        #[arg(long, value_parser = ["rate", "lifecycle", "sharded"])]
        suite: Option<String>,

        /// Virtual users override (constant-vus scenarios only)
        #[arg(long)]
        vus: Option<u32>,

        /// Duration override in seconds (constant-vus scenarios only)
        #[arg(long)]
        duration: Option<u64>,

        /// Disable the JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate a starter qms-tester.toml config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            qms_addr,
            sut_addr,
            config,
            suite,
            vus,
            duration,
            no_report,
            no_color,
        } => {
            execute_run(
                qms_addr, sut_addr, config, suite, vus, duration, no_report, no_color,
            )
            .await
        },
        Commands::Init { force } => execute_init(force),
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_run(
    qms_addr: String,
    sut_addr: Option<String>,
    config_path: Option<PathBuf>,
    suite: Option<String>,
    vus: Option<u32>,
    duration: Option<u64>,
    no_report: bool,
    no_color: bool,
) -> Result<()> {
    let mut config = resolve_config(config_path, suite.as_deref())?;
    apply_overrides(&mut config, vus, duration);

    if no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let client = QmsClient::new(
        &qms_addr,
        sut_addr.as_deref(),
        config.settings.timeout_as_duration(),
    )?;
    if sut_addr.is_none() {
        eprintln!("Note: SUT_ADDR not set; granted quotas will not be exercised with a ping.");
    }

    let engine = SuiteEngine::new(config, client).with_live_display(true);
    let result = engine
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Suite run failed: {}", e))?;

    let verdicts = thresholds::evaluate(&result.snapshot, engine.config());

    let summary = render_summary(&result, engine.config(), &qms_addr, &verdicts);
    println!("{summary}");

    if !no_report {
        let report = SuiteReport::from_result(&result, engine.config(), &verdicts, &qms_addr);
        let cwd = std::env::current_dir()?;
        match write_report(&report, &cwd) {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            },
            Err(e) => {
                eprintln!();
                eprintln!("Warning: Failed to write report: {}", e);
                // Non-fatal -- the run itself completed.
            },
        }
    }

    if !thresholds::all_passed(&verdicts) {
        anyhow::bail!("One or more thresholds failed");
    }
    Ok(())
}

/// Resolve the suite config: explicit path, discovered file, named
/// preset, or the default rate suite, in that order.
fn resolve_config(config_path: Option<PathBuf>, suite: Option<&str>) -> Result<SuiteConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\nUse `qms-tester init` to create one.",
                path.display()
            );
        }
        eprintln!("Loading suite from: {}", path.display());
        return SuiteConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path.display(), e));
    }

    if suite.is_none() {
        let discovered = PathBuf::from(CONFIG_FILENAME);
        if discovered.exists() {
            eprintln!("Loading suite from: {}", discovered.display());
            return SuiteConfig::load(&discovered).map_err(|e| {
                anyhow::anyhow!("Failed to load config '{}': {}", discovered.display(), e)
            });
        }
    }

    Ok(match suite {
        Some("lifecycle") => SuiteConfig::lifecycle_suite(),
        Some("sharded") => SuiteConfig::sharded_suite(),
        // clap restricts the value set; anything else is the default.
        _ => SuiteConfig::rate_suite(),
    })
}

/// Apply CLI flag overrides to a loaded config.
///
/// Stage-driven scenarios define their own VU targets, so `--vus` and
/// `--duration` only apply to constant-vus scenarios; a warning is
/// printed when they are skipped.
fn apply_overrides(config: &mut SuiteConfig, vus: Option<u32>, duration: Option<u64>) {
    for sc in &mut config.scenario {
        match sc.executor {
            qms_tester::ExecutorKind::ConstantVus => {
                if let Some(v) = vus {
                    sc.vus = v;
                }
                if let Some(d) = duration {
                    sc.duration_secs = d;
                }
            },
            qms_tester::ExecutorKind::RampingVus => {
                if vus.is_some() || duration.is_some() {
                    eprintln!(
                        "Warning: --vus/--duration ignored for scenario '{}' (stages define its shape)",
                        sc.name
                    );
                }
            },
        }
    }
}

/// Write a starter config file mirroring the canonical smoke + stress
/// schedule.
fn execute_init(force: bool) -> Result<()> {
    let config_path = std::env::current_dir()?.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\nUse `--force` to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, starter_template())?;
    eprintln!("Created {}", config_path.display());
    eprintln!("Edit the file to customize scenarios, then run:");
    eprintln!("  QMS_ADDR=localhost:6789 qms-tester run");
    Ok(())
}

/// The starter template written by `qms-tester init`.
fn starter_template() -> String {
    r#"# qms-tester suite configuration.
#
# Addresses are NOT configured here: set QMS_ADDR (required) and
# SUT_ADDR (optional, enables the post-grant ping) in the environment,
# or pass --qms-addr / --sut-addr.

[settings]
# Per-request timeout. Requests exceeding it count as transport failures.
timeout_ms = 1000

# A single-VU pass over every endpoint's found and not-found contract
# branches. Runs first so correctness is validated before any load.
[[scenario]]
name = "smoke"
exec = "smoke"
executor = "constant-vus"
vus = 1
duration_secs = 30

# Ramping allow() stress against the fixed key, pinging the system under
# test whenever a quota is granted. Starts after the smoke scenario and
# its graceful-stop window.
[[scenario]]
name = "stress"
exec = "stress-allow"
executor = "ramping-vus"
start_after_secs = 60
sleep_ms = 200

[scenario.thresholds]
p99_ms = 1000
max_failure_rate = 0.01

[[scenario.stage]]
target_vus = 100
duration_secs = 30

[[scenario.stage]]
target_vus = 100
duration_secs = 180

[[scenario.stage]]
target_vus = 150
duration_secs = 30

[[scenario.stage]]
target_vus = 150
duration_secs = 180

[[scenario.stage]]
target_vus = 0
duration_secs = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qms_tester::ExecutorKind;

    #[test]
    fn test_starter_template_parses_and_validates() {
        let config = SuiteConfig::from_toml(&starter_template()).unwrap();
        assert_eq!(config.scenario.len(), 2);
        assert_eq!(config.scenario[0].name, "smoke");
        assert_eq!(config.scenario[1].name, "stress");
        assert_eq!(config.scenario[1].stage.len(), 5);
        assert_eq!(config.scenario[1].thresholds.p99_ms, 1000);
    }

    #[test]
    fn test_apply_overrides_only_touches_constant_scenarios() {
        let mut config = SuiteConfig::rate_suite();
        apply_overrides(&mut config, Some(5), Some(120));

        let smoke = &config.scenario[0];
        assert_eq!(smoke.executor, ExecutorKind::ConstantVus);
        assert_eq!(smoke.vus, 5);
        assert_eq!(smoke.duration_secs, 120);

        // The ramping stress scenario keeps its stage-defined shape.
        let stress = &config.scenario[1];
        assert_eq!(stress.executor, ExecutorKind::RampingVus);
        assert!(!stress.stage.is_empty());
    }

    #[test]
    fn test_resolve_config_missing_explicit_path_fails() {
        let err = resolve_config(Some(PathBuf::from("/nonexistent/suite.toml")), None)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_resolve_config_preset_names() {
        let rate = resolve_config(None, Some("rate")).unwrap();
        assert_eq!(rate.scenario.len(), 2);
        let lifecycle = resolve_config(None, Some("lifecycle")).unwrap();
        assert_eq!(lifecycle.scenario[0].exec, qms_tester::ExecKind::Lifecycle);
        let sharded = resolve_config(None, Some("sharded")).unwrap();
        assert_eq!(
            sharded.scenario[0].exec,
            qms_tester::ExecKind::StressAllowSharded
        );
    }
}
