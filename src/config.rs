//! TOML-based test suite configuration.
//!
//! A suite is one or more named scenarios, each with its own executor
//! (constant or ramping virtual users), start offset, pacing, and key
//! pool. Scenarios are loaded once at startup, validated, and never
//! mutated during a run.
//!
//! # Example TOML
//!
//! ```toml
//! [settings]
//! timeout_ms = 1000
//!
//! [[scenario]]
//! name = "smoke"
//! exec = "smoke"
//! executor = "constant-vus"
//! vus = 1
//! duration_secs = 30
//!
//! [[scenario]]
//! name = "stress"
//! exec = "stress-allow"
//! executor = "ramping-vus"
//! start_after_secs = 30
//! sleep_ms = 200
//!
//! [[scenario.stage]]
//! target_vus = 100
//! duration_secs = 30
//!
//! [[scenario.stage]]
//! target_vus = 100
//! duration_secs = 180
//!
//! [[scenario.stage]]
//! target_vus = 0
//! duration_secs = 30
//! ```
//!
//! Note: the QMS and SUT addresses are NOT part of the config file. They
//! come from CLI flags or the `QMS_ADDR`/`SUT_ADDR` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessError;
use crate::thresholds::Thresholds;

/// A load-shaping stage defining a target VU count and duration.
///
/// Stages are defined as `[[scenario.stage]]` blocks and enable the
/// k6-style ramping profile (ramp-up, hold, ramp-down). The engine
/// linearly ramps VU count to `target_vus` over the stage's duration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Target number of virtual users at the end of this stage.
    pub target_vus: u32,
    /// Duration of this stage in seconds.
    pub duration_secs: u64,
}

/// The iteration body a scenario executes on every loop.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExecKind {
    /// Single-shot contract probes: every endpoint is exercised once with
    /// a known key and once with the `unknown/unknown` sentinel, checking
    /// both the found and not-found contract branches.
    Smoke,
    /// `view -> view -> alloc -> free` with a random resource in a fixed
    /// namespace, modeling read-modify-release usage.
    Lifecycle,
    /// One `allow` per iteration against the fixed key, chaining a ping
    /// to the system under test when the quota is granted.
    StressAllow,
    /// One `allow` per iteration with a random key drawn from the pool,
    /// spreading load across buckets. No SUT chain.
    StressAllowSharded,
}

impl fmt::Display for ExecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Smoke => "smoke",
            Self::Lifecycle => "lifecycle",
            Self::StressAllow => "stress-allow",
            Self::StressAllowSharded => "stress-allow-sharded",
        };
        f.write_str(s)
    }
}

/// Concurrency model for a scenario.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Fixed VU count for a fixed duration (`vus` + `duration_secs`).
    ConstantVus,
    /// Piecewise-linear VU profile defined by `[[scenario.stage]]` blocks.
    RampingVus,
}

/// Bounded key pool a scenario draws namespace/resource pairs from.
///
/// A pool of size 1x1 always yields `namespace1/resource1`, which is the
/// deterministic functional-test key. Larger pools spread load uniformly
/// across `namespace{1..=namespaces}` x `resource{1..=resources}`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct KeyPool {
    /// Number of namespaces in the pool.
    pub namespaces: u32,
    /// Number of resources per namespace in the pool.
    pub resources: u32,
}

impl KeyPool {
    /// The deterministic single-key pool (`namespace1/resource1`).
    pub const fn fixed() -> Self {
        Self {
            namespaces: 1,
            resources: 1,
        }
    }
}

/// A single named scenario within a suite.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScenarioConfig {
    /// Scenario name, used as the metrics tag and in threshold evaluation.
    pub name: String,
    /// Iteration body to execute.
    pub exec: ExecKind,
    /// Concurrency model.
    pub executor: ExecutorKind,
    /// VU count for `constant-vus` executors. Ignored when stages are set.
    #[serde(default)]
    pub vus: u32,
    /// Duration in seconds for `constant-vus` executors.
    #[serde(default)]
    pub duration_secs: u64,
    /// Ramping profile for `ramping-vus` executors.
    #[serde(default)]
    pub stage: Vec<Stage>,
    /// Offset from run start before this scenario begins spawning VUs.
    #[serde(default)]
    pub start_after_secs: u64,
    /// Window after the scenario deadline during which in-flight
    /// iterations may finish their current step before a hard abort.
    #[serde(default = "default_graceful_stop")]
    pub graceful_stop_secs: u64,
    /// Pacing sleep after each iteration, in milliseconds.
    #[serde(default)]
    pub sleep_ms: u64,
    /// Key pool override. Defaults to the canonical pool for `exec`.
    #[serde(default)]
    pub keys: Option<KeyPool>,
    /// Pass/fail bounds evaluated for this scenario's tag after the run.
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_graceful_stop() -> u64 {
    30
}

impl ScenarioConfig {
    /// The key pool in effect: the explicit override, or the canonical
    /// pool for this scenario's exec kind.
    pub fn key_pool(&self) -> KeyPool {
        self.keys.unwrap_or(match self.exec {
            ExecKind::Smoke | ExecKind::StressAllow => KeyPool::fixed(),
            ExecKind::Lifecycle => KeyPool {
                namespaces: 1,
                resources: 5,
            },
            ExecKind::StressAllowSharded => KeyPool {
                namespaces: 3,
                resources: 10,
            },
        })
    }

    /// Total scheduled duration of this scenario in seconds, excluding
    /// the start offset and graceful-stop window.
    pub fn scheduled_duration_secs(&self) -> u64 {
        match self.executor {
            ExecutorKind::ConstantVus => self.duration_secs,
            ExecutorKind::RampingVus => self.stage.iter().map(|s| s.duration_secs).sum(),
        }
    }

    /// Peak VU count this scenario can reach.
    pub fn peak_vus(&self) -> u32 {
        match self.executor {
            ExecutorKind::ConstantVus => self.vus,
            ExecutorKind::RampingVus => {
                self.stage.iter().map(|s| s.target_vus).max().unwrap_or(0)
            },
        }
    }

    /// Pacing sleep as a [`Duration`].
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }
}

/// General suite settings controlling execution parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Settings {
    /// Convert the `timeout_ms` field to a [`Duration`].
    pub fn timeout_as_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level suite configuration parsed from a TOML file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SuiteConfig {
    /// General settings.
    #[serde(default)]
    pub settings: Settings,
    /// Named scenarios. The field name is `scenario` (not `scenarios`)
    /// because TOML `[[scenario]]` array-of-tables syntax creates a key
    /// called `scenario`.
    pub scenario: Vec<ScenarioConfig>,
}

impl SuiteConfig {
    /// Parse a TOML string into a validated [`SuiteConfig`].
    pub fn from_toml(content: &str) -> Result<Self, HarnessError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`SuiteConfig`] from a file path.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Total wall-clock budget of the suite in seconds: the latest
    /// scenario end, including start offsets and graceful-stop windows.
    pub fn total_duration_secs(&self) -> u64 {
        self.scenario
            .iter()
            .map(|s| s.start_after_secs + s.scheduled_duration_secs() + s.graceful_stop_secs)
            .max()
            .unwrap_or(0)
    }

    /// Validate that the suite is semantically correct.
    ///
    /// Checks:
    /// - At least one scenario is defined and names are unique
    /// - `constant-vus` scenarios have `vus > 0`, `duration_secs > 0`,
    ///   and no stage list
    /// - `ramping-vus` scenarios have a non-empty stage list with
    ///   positive durations
    /// - Key pools have non-zero dimensions
    /// - The per-request timeout is positive
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.scenario.is_empty() {
            return Err(HarnessError::ConfigValidation {
                message: "Suite must contain at least one [[scenario]]".to_string(),
            });
        }

        if self.settings.timeout_ms == 0 {
            return Err(HarnessError::ConfigValidation {
                message: "settings.timeout_ms must be positive".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for sc in &self.scenario {
            if sc.name.is_empty() {
                return Err(HarnessError::ConfigValidation {
                    message: "Scenario name must not be empty".to_string(),
                });
            }
            if !seen.insert(sc.name.as_str()) {
                return Err(HarnessError::ConfigValidation {
                    message: format!("Duplicate scenario name '{}'", sc.name),
                });
            }

            match sc.executor {
                ExecutorKind::ConstantVus => {
                    if sc.vus == 0 || sc.duration_secs == 0 {
                        return Err(HarnessError::ConfigValidation {
                            message: format!(
                                "Scenario '{}' uses constant-vus and requires vus > 0 and duration_secs > 0",
                                sc.name
                            ),
                        });
                    }
                    if !sc.stage.is_empty() {
                        return Err(HarnessError::ConfigValidation {
                            message: format!(
                                "Scenario '{}' uses constant-vus but defines [[scenario.stage]] blocks",
                                sc.name
                            ),
                        });
                    }
                },
                ExecutorKind::RampingVus => {
                    if sc.stage.is_empty() {
                        return Err(HarnessError::ConfigValidation {
                            message: format!(
                                "Scenario '{}' uses ramping-vus and requires [[scenario.stage]] blocks",
                                sc.name
                            ),
                        });
                    }
                    for (i, stage) in sc.stage.iter().enumerate() {
                        if stage.duration_secs == 0 {
                            return Err(HarnessError::ConfigValidation {
                                message: format!(
                                    "Scenario '{}' stage {} has duration_secs=0; each stage must have a positive duration",
                                    sc.name,
                                    i + 1
                                ),
                            });
                        }
                    }
                },
            }

            let pool = sc.key_pool();
            if pool.namespaces == 0 || pool.resources == 0 {
                return Err(HarnessError::ConfigValidation {
                    message: format!(
                        "Scenario '{}' key pool must have namespaces > 0 and resources > 0",
                        sc.name
                    ),
                });
            }
        }

        Ok(())
    }

    /// The canonical rate-limiting suite: a 30s single-VU smoke pass
    /// validating the contract, followed by a ramping stress scenario
    /// that starts once the smoke scenario (and its stop window) is done.
    pub fn rate_suite() -> Self {
        Self {
            settings: Settings::default(),
            scenario: vec![
                ScenarioConfig {
                    name: "smoke".to_string(),
                    exec: ExecKind::Smoke,
                    executor: ExecutorKind::ConstantVus,
                    vus: 1,
                    duration_secs: 30,
                    stage: Vec::new(),
                    start_after_secs: 0,
                    graceful_stop_secs: default_graceful_stop(),
                    sleep_ms: 0,
                    keys: None,
                    thresholds: Thresholds::default(),
                },
                ScenarioConfig {
                    name: "stress".to_string(),
                    exec: ExecKind::StressAllow,
                    executor: ExecutorKind::RampingVus,
                    vus: 0,
                    duration_secs: 0,
                    stage: stress_ladder(&[100, 150, 200, 250, 300]),
                    start_after_secs: 60,
                    graceful_stop_secs: default_graceful_stop(),
                    sleep_ms: 200,
                    keys: None,
                    thresholds: Thresholds::default(),
                },
            ],
        }
    }

    /// Allocation lifecycle stress suite: `view -> view -> alloc -> free`
    /// under a modest ramp.
    pub fn lifecycle_suite() -> Self {
        Self {
            settings: Settings::default(),
            scenario: vec![ScenarioConfig {
                name: "stress".to_string(),
                exec: ExecKind::Lifecycle,
                executor: ExecutorKind::RampingVus,
                vus: 0,
                duration_secs: 0,
                stage: stress_ladder(&[50]),
                start_after_secs: 0,
                graceful_stop_secs: default_graceful_stop(),
                sleep_ms: 800,
                keys: None,
                thresholds: Thresholds::default(),
            }],
        }
    }

    /// Sharded allow stress suite: random keys across the provisioned
    /// pool to avoid artificial single-bucket contention.
    pub fn sharded_suite() -> Self {
        Self {
            settings: Settings::default(),
            scenario: vec![ScenarioConfig {
                name: "stress".to_string(),
                exec: ExecKind::StressAllowSharded,
                executor: ExecutorKind::RampingVus,
                vus: 0,
                duration_secs: 0,
                stage: stress_ladder(&[100, 150, 200, 250, 300, 350, 400, 450, 500]),
                start_after_secs: 0,
                graceful_stop_secs: default_graceful_stop(),
                sleep_ms: 200,
                keys: None,
                thresholds: Thresholds::default(),
            }],
        }
    }
}

/// Build the canonical stress ladder: for each plateau, a 30s ramp to the
/// target followed by a 3m hold, then a final 30s ramp down to zero.
fn stress_ladder(plateaus: &[u32]) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(plateaus.len() * 2 + 1);
    for &target in plateaus {
        stages.push(Stage {
            target_vus: target,
            duration_secs: 30,
        });
        stages.push(Stage {
            target_vus: target,
            duration_secs: 180,
        });
    }
    stages.push(Stage {
        target_vus: 0,
        duration_secs: 30,
    });
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_constant_suite() {
        let toml_str = r#"
[[scenario]]
name = "smoke"
exec = "smoke"
executor = "constant-vus"
vus = 1
duration_secs = 30
"#;
        let config = SuiteConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.settings.timeout_ms, 1000);
        assert_eq!(config.scenario.len(), 1);
        assert_eq!(config.scenario[0].exec, ExecKind::Smoke);
        assert_eq!(config.scenario[0].graceful_stop_secs, 30);
        assert_eq!(config.scenario[0].key_pool(), KeyPool::fixed());
    }

    #[test]
    fn test_parse_ramping_suite_with_stages() {
        let toml_str = r#"
[settings]
timeout_ms = 2000

[[scenario]]
name = "stress"
exec = "stress-allow-sharded"
executor = "ramping-vus"
sleep_ms = 200

[[scenario.stage]]
target_vus = 100
duration_secs = 30

[[scenario.stage]]
target_vus = 100
duration_secs = 180

[[scenario.stage]]
target_vus = 0
duration_secs = 30
"#;
        let config = SuiteConfig::from_toml(toml_str).unwrap();
        let sc = &config.scenario[0];
        assert_eq!(config.settings.timeout_ms, 2000);
        assert_eq!(sc.stage.len(), 3);
        assert_eq!(sc.stage[0].target_vus, 100);
        assert_eq!(sc.scheduled_duration_secs(), 240);
        assert_eq!(sc.peak_vus(), 100);
        assert_eq!(
            sc.key_pool(),
            KeyPool {
                namespaces: 3,
                resources: 10
            }
        );
    }

    #[test]
    fn test_validate_empty_suite_fails() {
        let config = SuiteConfig {
            settings: Settings::default(),
            scenario: vec![],
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            HarnessError::ConfigValidation { .. }
        ));
    }

    #[test]
    fn test_validate_duplicate_names_fail() {
        let mut config = SuiteConfig::rate_suite();
        config.scenario[1].name = "smoke".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate scenario name"));
    }

    #[test]
    fn test_validate_constant_requires_vus_and_duration() {
        let toml_str = r#"
[[scenario]]
name = "smoke"
exec = "smoke"
executor = "constant-vus"
vus = 0
duration_secs = 30
"#;
        let result = SuiteConfig::from_toml(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_ramping_requires_stages() {
        let toml_str = r#"
[[scenario]]
name = "stress"
exec = "stress-allow"
executor = "ramping-vus"
"#;
        let err = SuiteConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("[[scenario.stage]]"));
    }

    #[test]
    fn test_validate_zero_duration_stage_fails() {
        let toml_str = r#"
[[scenario]]
name = "stress"
exec = "stress-allow"
executor = "ramping-vus"

[[scenario.stage]]
target_vus = 10
duration_secs = 0
"#;
        let err = SuiteConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("duration_secs=0"));
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let toml_str = r#"
[settings]
timeout_ms = 0

[[scenario]]
name = "smoke"
exec = "smoke"
executor = "constant-vus"
vus = 1
duration_secs = 30
"#;
        let err = SuiteConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let toml_content = r#"
[[scenario]]
name = "smoke"
exec = "smoke"
executor = "constant-vus"
vus = 1
duration_secs = 30
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        tmpfile.write_all(toml_content.as_bytes()).unwrap();
        tmpfile.flush().unwrap();

        let config = SuiteConfig::load(tmpfile.path()).unwrap();
        assert_eq!(config.scenario.len(), 1);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = SuiteConfig::load(Path::new("/nonexistent/suite.toml"));
        assert!(matches!(
            result.unwrap_err(),
            HarnessError::ConfigIo { .. }
        ));
    }

    #[test]
    fn test_rate_suite_schedule() {
        let suite = SuiteConfig::rate_suite();
        suite.validate().unwrap();
        assert_eq!(suite.scenario[0].name, "smoke");
        assert_eq!(suite.scenario[0].start_after_secs, 0);
        // Stress begins only after the smoke window and its stop window.
        assert_eq!(
            suite.scenario[1].start_after_secs,
            suite.scenario[0].duration_secs + suite.scenario[0].graceful_stop_secs
        );
    }

    #[test]
    fn test_stress_ladder_shape() {
        let stages = stress_ladder(&[100, 150]);
        assert_eq!(stages.len(), 5);
        assert_eq!(stages[0].target_vus, 100);
        assert_eq!(stages[0].duration_secs, 30);
        assert_eq!(stages[1].duration_secs, 180);
        assert_eq!(stages.last().unwrap().target_vus, 0);
    }

    #[test]
    fn test_builtin_suites_validate() {
        SuiteConfig::rate_suite().validate().unwrap();
        SuiteConfig::lifecycle_suite().validate().unwrap();
        SuiteConfig::sharded_suite().validate().unwrap();
    }

    #[test]
    fn test_total_duration_covers_offsets_and_stop_windows() {
        let suite = SuiteConfig::rate_suite();
        let stress = &suite.scenario[1];
        let expected =
            stress.start_after_secs + stress.scheduled_duration_secs() + stress.graceful_stop_secs;
        assert_eq!(suite.total_duration_secs(), expected);
    }

    #[test]
    fn test_exec_kind_display() {
        assert_eq!(ExecKind::Smoke.to_string(), "smoke");
        assert_eq!(ExecKind::Lifecycle.to_string(), "lifecycle");
        assert_eq!(ExecKind::StressAllow.to_string(), "stress-allow");
        assert_eq!(
            ExecKind::StressAllowSharded.to_string(),
            "stress-allow-sharded"
        );
    }
}
