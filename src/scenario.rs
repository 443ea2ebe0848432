//! Scenario executors: the per-iteration bodies.
//!
//! Each iteration is a fixed, strictly ordered sequence of logical calls.
//! A failed assertion is recorded and the sequence continues; an
//! iteration never aborts the run. Ordering is only guaranteed within an
//! iteration, never across virtual users.

use rand::rngs::StdRng;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::QmsClient;
use crate::config::{ExecKind, ScenarioConfig};
use crate::contract::{self, Envelope, Expectation, Verdict};
use crate::metrics::{OperationType, RequestSample, RunCounters};
use crate::request::{AllocRequest, AllowRequest, KeySelector, QuotaKey, ViewRequest};

/// Executes one scenario's iteration body. One instance is shared by all
/// of the scenario's virtual users; per-VU state (the RNG) stays in the
/// VU loop.
pub struct ScenarioExecutor {
    tag: String,
    exec: ExecKind,
    selector: KeySelector,
    client: QmsClient,
    counters: RunCounters,
    sample_tx: mpsc::Sender<RequestSample>,
}

impl ScenarioExecutor {
    pub fn new(
        config: &ScenarioConfig,
        client: QmsClient,
        counters: RunCounters,
        sample_tx: mpsc::Sender<RequestSample>,
    ) -> Self {
        Self {
            tag: config.name.clone(),
            exec: config.exec,
            selector: KeySelector::from_pool(config.key_pool()),
            client,
            counters,
            sample_tx,
        }
    }

    /// Run one iteration of this scenario's body.
    ///
    /// `abort` is the hard-stop token: it is checked between steps so a
    /// drained scenario finishes its current call but issues no further
    /// ones. Per-call timeouts bound each individual step.
    pub async fn run_iteration(&self, rng: &mut StdRng, abort: &CancellationToken) {
        match self.exec {
            ExecKind::Smoke => self.smoke_iteration(abort).await,
            ExecKind::Lifecycle => self.lifecycle_iteration(rng, abort).await,
            ExecKind::StressAllow => {
                self.allow_step(QuotaKey::numbered(1, 1), Expectation::Found, true)
                    .await;
            },
            ExecKind::StressAllowSharded => {
                let key = self.selector.pick(rng);
                self.allow_step(key, Expectation::Found, false).await;
            },
        }
    }

    /// Contract probes: each endpoint once with the known key and once
    /// with the `unknown/unknown` sentinel, so every found and not-found
    /// branch is exercised per iteration.
    async fn smoke_iteration(&self, abort: &CancellationToken) {
        let known = QuotaKey::numbered(1, 1);

        self.allow_step(known.clone(), Expectation::Granted, true)
            .await;
        if abort.is_cancelled() {
            return;
        }
        self.allow_step(QuotaKey::unknown(), Expectation::NotFound, false)
            .await;
        if abort.is_cancelled() {
            return;
        }

        self.view_step(known.clone(), Expectation::Found).await;
        if abort.is_cancelled() {
            return;
        }
        self.view_step(QuotaKey::unknown(), Expectation::NotFound)
            .await;
        if abort.is_cancelled() {
            return;
        }

        self.alloc_step(known.clone(), Expectation::Found).await;
        if abort.is_cancelled() {
            return;
        }
        self.alloc_step(QuotaKey::unknown(), Expectation::NotFound)
            .await;
        if abort.is_cancelled() {
            return;
        }

        self.free_step(known, Expectation::Found).await;
        if abort.is_cancelled() {
            return;
        }
        self.free_step(QuotaKey::unknown(), Expectation::NotFound)
            .await;
    }

    /// Read-modify-release: two views, an alloc, and a free, each on an
    /// independently drawn resource within the pool's namespace.
    ///
    /// Alloc and free always echo version 0, so an optimistic-version
    /// conflict is an expected outcome and validated as the not-found
    /// branch (`Expectation::Either`).
    async fn lifecycle_iteration(&self, rng: &mut StdRng, abort: &CancellationToken) {
        self.view_step(self.selector.pick(rng), Expectation::Found)
            .await;
        if abort.is_cancelled() {
            return;
        }
        self.view_step(self.selector.pick(rng), Expectation::Found)
            .await;
        if abort.is_cancelled() {
            return;
        }
        self.alloc_step(self.selector.pick(rng), Expectation::Either)
            .await;
        if abort.is_cancelled() {
            return;
        }
        self.free_step(self.selector.pick(rng), Expectation::Either)
            .await;
    }

    /// Issue one `allow` and, when the quota is granted with zero wait
    /// and `chain_ping` is set, exactly one ping against the system
    /// under test.
    async fn allow_step(&self, key: QuotaKey, expect: Expectation, chain_ping: bool) {
        let request = AllowRequest::new(key);
        self.counters.incr_request();

        let start = Instant::now();
        let outcome = self.client.allow(&request).await;
        let duration = start.elapsed();

        let verdict = match outcome {
            Ok(body) => {
                let verdict = validate_body(&body, |env| contract::validate_allow(env, expect));
                self.emit(RequestSample::success(
                    &self.tag,
                    OperationType::Allow,
                    duration,
                    verdict.failures.clone(),
                ))
                .await;
                verdict
            },
            Err(err) => {
                self.counters.incr_failure();
                self.emit(RequestSample::error(
                    &self.tag,
                    OperationType::Allow,
                    duration,
                    err,
                ))
                .await;
                return;
            },
        };

        if verdict.granted {
            self.counters.incr_allowed();
            if chain_ping {
                self.ping_step().await;
            }
        }
    }

    async fn alloc_step(&self, key: QuotaKey, expect: Expectation) {
        let request = AllocRequest::new(key);
        self.counters.incr_request();

        let start = Instant::now();
        let outcome = self.client.alloc(&request).await;
        let duration = start.elapsed();

        match outcome {
            Ok(body) => {
                let verdict = validate_body(&body, |env| contract::validate_alloc(env, expect));
                self.emit(RequestSample::success(
                    &self.tag,
                    OperationType::Alloc,
                    duration,
                    verdict.failures,
                ))
                .await;
            },
            Err(err) => {
                self.counters.incr_failure();
                self.emit(RequestSample::error(
                    &self.tag,
                    OperationType::Alloc,
                    duration,
                    err,
                ))
                .await;
            },
        }
    }

    async fn free_step(&self, key: QuotaKey, expect: Expectation) {
        let request = AllocRequest::new(key);
        self.counters.incr_request();

        let start = Instant::now();
        let outcome = self.client.free(&request).await;
        let duration = start.elapsed();

        match outcome {
            Ok(body) => {
                let verdict = validate_body(&body, |env| contract::validate_alloc(env, expect));
                self.emit(RequestSample::success(
                    &self.tag,
                    OperationType::Free,
                    duration,
                    verdict.failures,
                ))
                .await;
            },
            Err(err) => {
                self.counters.incr_failure();
                self.emit(RequestSample::error(
                    &self.tag,
                    OperationType::Free,
                    duration,
                    err,
                ))
                .await;
            },
        }
    }

    async fn view_step(&self, key: QuotaKey, expect: Expectation) {
        let request = ViewRequest::new(key);
        self.counters.incr_request();

        let start = Instant::now();
        let outcome = self.client.view(&request).await;
        let duration = start.elapsed();

        match outcome {
            Ok(body) => {
                let verdict = validate_body(&body, |env| contract::validate_view(env, expect));
                self.emit(RequestSample::success(
                    &self.tag,
                    OperationType::View,
                    duration,
                    verdict.failures,
                ))
                .await;
            },
            Err(err) => {
                self.counters.incr_failure();
                self.emit(RequestSample::error(
                    &self.tag,
                    OperationType::View,
                    duration,
                    err,
                ))
                .await;
            },
        }
    }

    /// Ping the system under test. Not a QMS request: it never touches
    /// the run counters, but its latency and failures are recorded under
    /// the scenario tag like any other HTTP exchange.
    async fn ping_step(&self) {
        let start = Instant::now();
        let outcome = self.client.ping_sut().await;
        let duration = start.elapsed();

        match outcome {
            Ok(true) => {
                self.emit(RequestSample::success(
                    &self.tag,
                    OperationType::Ping,
                    duration,
                    Vec::new(),
                ))
                .await;
            },
            Ok(false) => {
                // No SUT configured; nothing was sent.
            },
            Err(err) => {
                warn!(target: "qms.scenario", scenario = %self.tag, error = %err, "SUT ping failed");
                self.emit(RequestSample::error(
                    &self.tag,
                    OperationType::Ping,
                    duration,
                    err,
                ))
                .await;
            },
        }
    }

    async fn emit(&self, sample: RequestSample) {
        // A closed channel means the aggregator is gone and the run is
        // tearing down; dropping the sample is fine.
        let _ = self.sample_tx.send(sample).await;
    }
}

/// Parse a 200 body and validate it. A body that is not valid JSON is a
/// contract violation, reported through the verdict like any other
/// failed predicate.
fn validate_body<F>(body: &str, validate: F) -> Verdict
where
    F: FnOnce(&Envelope) -> Verdict,
{
    match Envelope::parse(body) {
        Ok(env) => validate(&env),
        Err(e) => Verdict {
            failures: vec![format!("invalid JSON body: {e}")],
            granted: false,
        },
    }
}
