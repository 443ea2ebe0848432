//! Virtual user (VU) task loop.
//!
//! Each VU is a sequential stream of iterations: run the scenario body,
//! sleep the configured pacing, repeat. No state crosses an iteration
//! boundary except the shared counters and the metrics channel.
//!
//! Shutdown is two-phase. The `quiesce` token stops a VU from starting
//! another iteration; the `abort` token is checked between steps inside
//! an iteration so a drained run stops issuing calls without cutting one
//! off mid-request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::scenario::ScenarioExecutor;

/// Atomic counter tracking currently active virtual users across the
/// whole run. Clone-friendly for sharing between VU tasks, the stage
/// schedulers, and the live display.
#[derive(Clone)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Main virtual user task loop.
///
/// Runs iterations of the scenario body until the `quiesce` token fires,
/// sleeping `pacing` between iterations. The `active_vus` counter is
/// incremented on entry and decremented on every exit path.
pub async fn vu_loop(
    vu_id: u32,
    executor: Arc<ScenarioExecutor>,
    pacing: Duration,
    quiesce: CancellationToken,
    abort: CancellationToken,
    active_vus: ActiveVuCounter,
) {
    active_vus.increment();
    debug!(target: "qms.vu", vu_id, "VU started");

    let mut rng = StdRng::from_rng(&mut rand::rng());

    loop {
        if quiesce.is_cancelled() {
            break;
        }

        executor.run_iteration(&mut rng, &abort).await;

        if pacing > Duration::ZERO {
            tokio::select! {
                _ = tokio::time::sleep(pacing) => {},
                _ = quiesce.cancelled() => break,
            }
        }
    }

    debug!(target: "qms.vu", vu_id, "VU stopped");
    active_vus.decrement();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::QmsClient;
    use crate::config::{ExecKind, ExecutorKind, ScenarioConfig};
    use crate::metrics::RunCounters;
    use crate::thresholds::Thresholds;
    use tokio::sync::mpsc;

    fn stress_executor(url: &str) -> Arc<ScenarioExecutor> {
        let config = ScenarioConfig {
            name: "stress".to_string(),
            exec: ExecKind::StressAllow,
            executor: ExecutorKind::ConstantVus,
            vus: 1,
            duration_secs: 1,
            stage: Vec::new(),
            start_after_secs: 0,
            graceful_stop_secs: 1,
            sleep_ms: 0,
            keys: None,
            thresholds: Thresholds::default(),
        };
        let client = QmsClient::new(url, None, Duration::from_millis(200)).unwrap();
        let (tx, mut rx) = mpsc::channel(1024);
        // Keep the channel open by detaching a drain task.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Arc::new(ScenarioExecutor::new(
            &config,
            client,
            RunCounters::new(),
            tx,
        ))
    }

    #[test]
    fn test_active_vu_counter_increment_decrement() {
        let counter = ActiveVuCounter::new();
        assert_eq!(counter.get(), 0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
        counter.decrement();
        assert_eq!(counter.get(), 1);
    }

    #[tokio::test]
    async fn test_vu_loop_exits_on_quiesce() {
        let executor = stress_executor("127.0.0.1:1");
        let quiesce = CancellationToken::new();
        let abort = CancellationToken::new();
        let active = ActiveVuCounter::new();

        let handle = tokio::spawn(vu_loop(
            0,
            executor,
            Duration::from_millis(10),
            quiesce.clone(),
            abort,
            active.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(active.get(), 1);

        quiesce.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("VU should stop promptly after quiesce")
            .unwrap();
        assert_eq!(active.get(), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_quiesce_runs_no_iteration() {
        let executor = stress_executor("127.0.0.1:1");
        let quiesce = CancellationToken::new();
        quiesce.cancel();
        let active = ActiveVuCounter::new();

        vu_loop(
            0,
            executor,
            Duration::ZERO,
            quiesce,
            CancellationToken::new(),
            active.clone(),
        )
        .await;
        assert_eq!(active.get(), 0);
    }
}
