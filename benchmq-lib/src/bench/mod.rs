//! Benchmark orchestration.
//!
//! An [`Orchestrator`] turns a validated [`BenchmarkSpec`] into one task per
//! simulated client, each driving its own [`MqttClient`] through the
//! workflow of the selected mode. Tasks only share the [`Metrics`] counters.
//! The orchestrator joins every launched task before it computes the
//! [`BenchmarkResult`].
//!
//! Cancellation through the [`ShutdownGuard`] stops the launch of new
//! clients and shortens every sleep (stagger, publish pacing, listen
//! window). Protocol calls already in flight are never aborted.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{graceful::ShutdownGuard, telemetry::tracing};
use tokio::{task::JoinSet, time::Instant};

use crate::mqtt::{ClientFactory, MqttClient};

mod conn;
mod metrics;
mod publish;
mod spec;
mod subscribe;

pub use self::{
    metrics::{BenchmarkMode, BenchmarkResult, Metrics, MetricsSnapshot, throughput},
    spec::{
        BenchmarkSpec, BenchmarkSpecBuilder, DEFAULT_CLIENTS, DEFAULT_DELAY_MILLIS,
        DEFAULT_MESSAGE, DEFAULT_MESSAGE_COUNT, DEFAULT_QOS, DEFAULT_TOPIC, ValidationError,
    },
    subscribe::{FALLBACK_LISTEN_WINDOW, listen_window},
};


pub struct Orchestrator<F> {
    spec: Arc<BenchmarkSpec>,
    factory: F,
    guard: ShutdownGuard,
    metrics: Arc<Metrics>,
}

impl<F> std::fmt::Debug for Orchestrator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("spec", &self.spec)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// State owned by the task of a single simulated client.
struct ClientTask<C> {
    client_id: String,
    client: C,
    spec: Arc<BenchmarkSpec>,
    metrics: ClientMetrics,
    guard: ShutdownGuard,
}

/// View of a single client on the shared [`Metrics`].
///
/// Remembers how many of the client's units (connections, messages or
/// subscriptions) got resolved, so the units of a task which panicked
/// can still be accounted as failed.
#[derive(Debug, Clone)]
struct ClientMetrics {
    shared: Arc<Metrics>,
    resolved: Arc<AtomicU64>,
}

impl ClientMetrics {
    fn new(shared: Arc<Metrics>) -> Self {
        Self {
            shared,
            resolved: Arc::new(AtomicU64::new(0)),
        }
    }

    fn record_succeeded(&self) {
        self.shared.record_succeeded();
        self.record_resolved(1);
    }

    fn record_failed(&self) {
        self.record_failed_n(1);
    }

    fn record_failed_n(&self, n: u64) {
        self.shared.record_failed_n(n);
        self.record_resolved(n);
    }

    fn record_received(&self) {
        self.shared.record_received();
    }

    /// Resolve units without counting them as succeeded or failed.
    fn record_resolved(&self, n: u64) {
        self.resolved.fetch_add(n, Ordering::Relaxed);
    }

    fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }
}

impl<F: ClientFactory> Orchestrator<F> {
    pub fn new(spec: BenchmarkSpec, factory: F, guard: ShutdownGuard) -> Self {
        Self {
            spec: Arc::new(spec),
            factory,
            guard,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Live counters of the run, e.g. to report progress while it is running.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Connect every client once (launches staggered by the delay) and disconnect again.
    ///
    /// Throughput is expressed in established connections per second.
    pub async fn run_connections(self) -> BenchmarkResult {
        let stagger = self.spec.delay();
        self.run(BenchmarkMode::Connections, stagger, 1, conn::run)
            .await
    }

    /// Every client connects and publishes the message `message_count` times.
    ///
    /// Throughput is expressed in intended messages per second.
    pub async fn run_publish(self) -> BenchmarkResult {
        let messages = self.spec.message_count();
        self.run(BenchmarkMode::Publish, Duration::ZERO, messages, publish::run)
            .await
    }

    /// Every client subscribes and counts the messages received within its listen window.
    ///
    /// Throughput is expressed in received messages per second.
    pub async fn run_subscribe(self) -> BenchmarkResult {
        self.run(BenchmarkMode::Subscribe, Duration::ZERO, 1, subscribe::run)
            .await
    }

    /// Launch and join one task per client.
    ///
    /// `units` is the amount of work a single client accounts for. A task
    /// which does not complete has its unresolved units counted as failed.
    async fn run<W, Fut>(
        self,
        mode: BenchmarkMode,
        stagger: Duration,
        units: u64,
        workflow: W,
    ) -> BenchmarkResult
    where
        W: Fn(ClientTask<F::Client>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let spec = &self.spec;
        tracing::info!(
            %mode,
            clients = spec.clients(),
            host = spec.host(),
            port = spec.port(),
            topic = spec.topic(),
            qos = %spec.qos(),
            delay = ?spec.delay(),
            message_count = spec.message_count(),
            "benchmark started",
        );

        let start = Instant::now();
        let mut tasks = JoinSet::new();
        let mut clients = HashMap::with_capacity(spec.clients());

        for index in 0..spec.clients() {
            let delay = if index == 0 { Duration::ZERO } else { stagger };
            if !sleep_or_cancel(&self.guard, delay).await {
                tracing::info!(
                    %mode,
                    launched = index,
                    clients = spec.clients(),
                    "stop launching clients: guard shutdown"
                );
                break;
            }

            let client_id = spec.client_id(index);
            let client = self
                .factory
                .new_client(spec.client_options(&client_id));

            let metrics = ClientMetrics::new(self.metrics.clone());
            let handle = tasks.spawn(workflow(ClientTask {
                client_id: client_id.clone(),
                client,
                spec: spec.clone(),
                metrics: metrics.clone(),
                guard: self.guard.clone(),
            }));
            clients.insert(handle.id(), (client_id, metrics));
            self.metrics.record_launched();
        }

        while let Some(result) = tasks.join_next_with_id().await {
            let Err(err) = result else {
                continue;
            };
            let Some((client_id, metrics)) = clients.get(&err.id()) else {
                tracing::error!("unknown client task failed: {err}");
                continue;
            };

            let lost = units.saturating_sub(metrics.resolved());
            self.metrics.record_failed_n(lost);
            if err.is_panic() {
                tracing::error!(%client_id, lost, "client task panicked: {err}");
            } else {
                tracing::warn!(%client_id, lost, "client task did not complete: {err}");
            }
        }

        let elapsed = start.elapsed();
        let snapshot = self.metrics.snapshot();

        let (expected, completed) = match mode {
            BenchmarkMode::Connections => (spec.clients() as u64, snapshot.succeeded),
            BenchmarkMode::Publish => (spec.expected_messages(), spec.expected_messages()),
            BenchmarkMode::Subscribe => (spec.expected_messages(), snapshot.received),
        };

        let result = BenchmarkResult {
            mode,
            clients: spec.clients(),
            launched: snapshot.launched,
            expected,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            received: snapshot.received,
            elapsed,
            throughput_per_second: throughput(completed, elapsed),
        };

        tracing::info!(
            %mode,
            launched = result.launched,
            expected = result.expected,
            succeeded = result.succeeded,
            failed = result.failed,
            received = result.received,
            ?elapsed,
            throughput = result.throughput_per_second,
            "benchmark finished",
        );

        result
    }
}

/// Sleep for `duration` unless the guard gets cancelled first.
///
/// Returns false if cancelled. A zero duration only checks for cancellation.
async fn sleep_or_cancel(guard: &ShutdownGuard, duration: Duration) -> bool {
    if duration.is_zero() {
        return tokio::select! {
            biased;
            _ = guard.cancelled() => false,
            _ = std::future::ready(()) => true,
        };
    }

    tokio::select! {
        biased;
        _ = guard.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
