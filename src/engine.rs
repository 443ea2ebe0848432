//! Suite execution engine: scheduling, concurrency shaping, and metrics
//! aggregation.
//!
//! The engine runs every scenario in the suite as an independent driver
//! task. A driver waits out its start offset, shapes concurrency with
//! its executor model (constant or ramping VUs), honors its graceful
//! stop window, and drains. Virtual users report [`RequestSample`]
//! values through a bounded mpsc channel to a single aggregator task,
//! which owns the [`MetricsRecorder`] and publishes snapshots through a
//! watch channel every 2 seconds for the live display.
//!
//! Shutdown paths:
//! - Schedule completion: each driver quiesces its own VUs.
//! - First Ctrl+C: graceful drain via the run-wide cancellation token.
//! - Second Ctrl+C: hard abort via `std::process::exit(1)`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::client::QmsClient;
use crate::config::{ExecutorKind, ScenarioConfig, SuiteConfig};
use crate::display::display_loop;
use crate::error::HarnessError;
use crate::metrics::{CounterSnapshot, MetricsRecorder, MetricsSnapshot, RequestSample, RunCounters};
use crate::scenario::ScenarioExecutor;
use crate::vu::{vu_loop, ActiveVuCounter};

/// Display state published through the watch channel to the live
/// terminal display.
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    /// Current metrics snapshot.
    pub snapshot: MetricsSnapshot,
    /// Current stage label (e.g., `"stress: stage 2/11"`), or `None`
    /// outside ramping phases.
    pub stage_label: Option<String>,
}

/// Result of a completed suite run.
#[derive(Debug)]
pub struct SuiteResult {
    /// Final metrics snapshot, including per-scenario-tag buckets.
    pub snapshot: MetricsSnapshot,
    /// Final values of the process-wide counters.
    pub counters: CounterSnapshot,
    /// Total elapsed wall-clock time.
    pub elapsed: Duration,
}

/// Top-level suite engine.
pub struct SuiteEngine {
    config: SuiteConfig,
    client: QmsClient,
    counters: RunCounters,
    live_display: bool,
}

impl SuiteEngine {
    /// Creates a new engine over a validated-at-run-time config.
    pub fn new(config: SuiteConfig, client: QmsClient) -> Self {
        Self {
            config,
            client,
            counters: RunCounters::new(),
            live_display: false,
        }
    }

    /// Enables the indicatif live status line.
    pub fn with_live_display(mut self, on: bool) -> Self {
        self.live_display = on;
        self
    }

    /// Returns a reference to the engine's configuration.
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Handle to the process-wide run counters.
    pub fn counters(&self) -> RunCounters {
        self.counters.clone()
    }

    /// Run the whole suite to completion and return the final metrics.
    pub async fn run(&self) -> Result<SuiteResult, HarnessError> {
        self.config.validate()?;

        let run_cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let active_vus = ActiveVuCounter::new();
        let stage_label: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        // Generous buffer: peak concurrency across all scenarios.
        let peak: u32 = self.config.scenario.iter().map(|s| s.peak_vus()).sum();
        let buffer_size = (peak as usize * 100).max(256);
        let (sample_tx, sample_rx) = mpsc::channel::<RequestSample>(buffer_size);

        let (display_tx, display_rx) = watch::channel(DisplayState::default());

        let test_start = Instant::now();

        // Metrics aggregator -- NOT on the tracker, it must outlive the VUs.
        let aggregator_handle = tokio::spawn(metrics_aggregator(
            sample_rx,
            display_tx,
            run_cancel.clone(),
            stage_label.clone(),
        ));

        let display_handle = if self.live_display {
            Some(tokio::spawn(display_loop(
                display_rx.clone(),
                active_vus.clone(),
                run_cancel.clone(),
                test_start,
            )))
        } else {
            None
        };

        for config in &self.config.scenario {
            let executor = Arc::new(ScenarioExecutor::new(
                config,
                self.client.clone(),
                self.counters.clone(),
                sample_tx.clone(),
            ));
            tracker.spawn(scenario_driver(
                config.clone(),
                executor,
                run_cancel.clone(),
                active_vus.clone(),
                stage_label.clone(),
            ));
        }
        tracker.close();

        // Drivers hold their own sender clones through their executors.
        drop(sample_tx);

        tokio::select! {
            _ = tracker.wait() => {},
            _ = handle_ctrl_c(run_cancel.clone()) => {},
        }
        tracker.wait().await;

        // The aggregator finishes once every executor (and its sender
        // clone) is gone; its last act is publishing the final snapshot.
        let _ = aggregator_handle.await;
        if let Some(handle) = display_handle {
            let _ = handle.await;
        }

        let snapshot = display_rx.borrow().snapshot.clone();

        Ok(SuiteResult {
            snapshot,
            counters: self.counters.snapshot(),
            elapsed: test_start.elapsed(),
        })
    }
}

/// Drives one scenario: start offset, concurrency shaping, graceful stop.
async fn scenario_driver(
    config: ScenarioConfig,
    executor: Arc<ScenarioExecutor>,
    run_cancel: CancellationToken,
    active_vus: ActiveVuCounter,
    stage_label: Arc<Mutex<Option<String>>>,
) {
    if config.start_after_secs > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.start_after_secs)) => {},
            _ = run_cancel.cancelled() => return,
        }
    }

    info!(
        target: "qms.engine",
        scenario = %config.name,
        exec = %config.exec,
        "scenario starting"
    );

    // Quiesce stops VUs from starting new iterations; abort is checked
    // between steps inside an iteration.
    let abort = CancellationToken::new();
    let tracker = TaskTracker::new();
    let pacing = config.pacing();

    match config.executor {
        ExecutorKind::ConstantVus => {
            let quiesce = run_cancel.child_token();
            for vu_id in 0..config.vus {
                tracker.spawn(vu_loop(
                    vu_id,
                    executor.clone(),
                    pacing,
                    quiesce.clone(),
                    abort.clone(),
                    active_vus.clone(),
                ));
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(config.duration_secs)) => {},
                _ = run_cancel.cancelled() => {},
            }
            quiesce.cancel();
        },
        ExecutorKind::RampingVus => {
            run_stages(
                &config,
                &executor,
                &tracker,
                &run_cancel,
                &abort,
                &active_vus,
                &stage_label,
                pacing,
            )
            .await;
        },
    }

    // Graceful stop: let in-flight iterations finish their current step
    // sequence, then hard-abort whatever is left.
    tracker.close();
    let drained = tokio::time::timeout(
        Duration::from_secs(config.graceful_stop_secs),
        tracker.wait(),
    )
    .await;
    if drained.is_err() {
        warn!(
            target: "qms.engine",
            scenario = %config.name,
            "graceful stop window elapsed, aborting in-flight iterations"
        );
        abort.cancel();
        tracker.wait().await;
    }

    *stage_label.lock().unwrap() = None;
    info!(target: "qms.engine", scenario = %config.name, "scenario complete");
}

/// Walk the stage list of a ramping scenario.
///
/// For each stage:
/// 1. Ramp up: spawn `(target - current)` VUs with linear stagger over
///    the stage, each holding its own child quiesce token.
/// 2. Ramp down: cancel VU tokens in LIFO order (last spawned, first
///    quiesced) so active VUs drop to the target at stage start.
/// 3. Hold: wait out the remaining stage time.
#[allow(clippy::too_many_arguments)]
async fn run_stages(
    config: &ScenarioConfig,
    executor: &Arc<ScenarioExecutor>,
    tracker: &TaskTracker,
    run_cancel: &CancellationToken,
    abort: &CancellationToken,
    active_vus: &ActiveVuCounter,
    stage_label: &Arc<Mutex<Option<String>>>,
    pacing: Duration,
) {
    let total_stages = config.stage.len();
    let mut vu_tokens: Vec<CancellationToken> = Vec::new();
    let mut next_vu_id: u32 = 0;

    'stages: for (stage_idx, stage) in config.stage.iter().enumerate() {
        if run_cancel.is_cancelled() {
            break;
        }

        *stage_label.lock().unwrap() = Some(format!(
            "{}: stage {}/{} -> {} VUs",
            config.name,
            stage_idx + 1,
            total_stages,
            stage.target_vus
        ));

        let stage_start = Instant::now();
        let stage_duration = Duration::from_secs(stage.duration_secs);
        let current = vu_tokens.len() as u32;
        let target = stage.target_vus;

        if target > current {
            let to_spawn = target - current;
            let delay_per_vu = if to_spawn > 1 {
                stage_duration / to_spawn
            } else {
                Duration::ZERO
            };

            for spawn_idx in 0..to_spawn {
                if run_cancel.is_cancelled() {
                    break 'stages;
                }

                let quiesce = run_cancel.child_token();
                vu_tokens.push(quiesce.clone());
                tracker.spawn(vu_loop(
                    next_vu_id,
                    executor.clone(),
                    pacing,
                    quiesce,
                    abort.clone(),
                    active_vus.clone(),
                ));
                next_vu_id += 1;

                // Stagger between spawns (not after the last one).
                if spawn_idx < to_spawn - 1 {
                    tokio::select! {
                        _ = tokio::time::sleep(delay_per_vu) => {},
                        _ = run_cancel.cancelled() => break 'stages,
                    }
                }
            }
        } else if target < current {
            for _ in 0..(current - target) {
                if let Some(token) = vu_tokens.pop() {
                    token.cancel();
                }
            }
        }
        // else: hold at the current level.

        let elapsed_in_stage = stage_start.elapsed();
        if elapsed_in_stage < stage_duration {
            tokio::select! {
                _ = tokio::time::sleep(stage_duration - elapsed_in_stage) => {},
                _ = run_cancel.cancelled() => break 'stages,
            }
        }
    }

    for token in &vu_tokens {
        token.cancel();
    }
}

/// Metrics aggregator task.
///
/// Consumes samples from the mpsc channel into a single-owner
/// [`MetricsRecorder`] and publishes [`DisplayState`] through the watch
/// channel every 2 seconds. Uses `biased;` select so the tick branch is
/// checked first, preventing display starvation while the channel is
/// busy. The final snapshot is published when all senders are gone or
/// the run is cancelled.
async fn metrics_aggregator(
    mut sample_rx: mpsc::Receiver<RequestSample>,
    display_tx: watch::Sender<DisplayState>,
    cancel: CancellationToken,
    stage_label: Arc<Mutex<Option<String>>>,
) {
    let mut recorder = MetricsRecorder::new();
    let mut tick = tokio::time::interval(Duration::from_secs(2));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = tick.tick() => {
                // Drain everything available before publishing.
                while let Ok(sample) = sample_rx.try_recv() {
                    recorder.record(&sample);
                }
                let _ = display_tx.send(DisplayState {
                    snapshot: recorder.snapshot(),
                    stage_label: stage_label.lock().unwrap().clone(),
                });
            }
            result = sample_rx.recv() => {
                match result {
                    Some(sample) => recorder.record(&sample),
                    None => {
                        // All senders dropped -- the run is over.
                        let _ = display_tx.send(DisplayState {
                            snapshot: recorder.snapshot(),
                            stage_label: None,
                        });
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                while let Ok(sample) = sample_rx.try_recv() {
                    recorder.record(&sample);
                }
                let _ = display_tx.send(DisplayState {
                    snapshot: recorder.snapshot(),
                    stage_label: None,
                });
                break;
            }
        }
    }
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C triggers graceful drain via the cancellation token.
/// Second Ctrl+C performs a hard abort via `std::process::exit(1)`.
async fn handle_ctrl_c(cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl_c handler");
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl_c handler");
    eprintln!("\nReceived second Ctrl+C, aborting immediately.");
    std::process::exit(1);
}
