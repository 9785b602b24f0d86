//! Common test utilities and fakes.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetwatch_lib::core::{
    ExporterError, Result, Workload, WorkloadGuid, WorkloadInstance,
};
use fleetwatch_lib::events::{
    ContainerMetric, Envelope, EventPayload, LogMessage, MessageType, WatchEvent,
};
use fleetwatch_lib::metrics::Metric;
use fleetwatch_lib::platform::{CredentialProvider, EventTransport, PlatformClient, Subscription};
use fleetwatch_lib::sink::Sink;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const MIB: u64 = 1024 * 1024;

pub fn guid(value: &str) -> WorkloadGuid {
    WorkloadGuid::new(value).unwrap()
}

pub fn workload(id: &str, instances: u32) -> Workload {
    Workload::app(guid(id), format!("app-{}", id), instances).in_space("org", "space")
}

pub fn instance(id: &str, index: u32) -> WorkloadInstance {
    WorkloadInstance::new(guid(id), index)
}

pub fn container_metric(index: u32, cpu: f64, memory: u64, memory_quota: u64) -> Envelope {
    Envelope::new(EventPayload::ContainerMetric(ContainerMetric {
        instance_index: index,
        cpu_percentage: cpu,
        memory_bytes: memory,
        disk_bytes: 512 * MIB,
        memory_bytes_quota: memory_quota,
        disk_bytes_quota: 1024 * MIB,
    }))
}

pub fn log_line(message: &str) -> Envelope {
    Envelope::new(EventPayload::LogMessage(LogMessage {
        message: message.to_string(),
        message_type: MessageType::Out,
        source_type: "APP/PROC/WEB".to_string(),
        source_instance: "0".to_string(),
    }))
}

/// Let spawned tasks run. Meant for `start_paused` tests.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Everything currently queued on `rx`.
pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Lifecycle notifications in `events`, ignoring telemetry.
pub fn lifecycle(events: &[WatchEvent]) -> Vec<WatchEvent> {
    events
        .iter()
        .filter(|event| !matches!(event, WatchEvent::Event(_)))
        .cloned()
        .collect()
}

pub fn created(id: &str, indices: impl IntoIterator<Item = u32>) -> Vec<WatchEvent> {
    indices
        .into_iter()
        .map(|index| WatchEvent::InstanceCreated(instance(id, index)))
        .collect()
}

pub fn deleted(id: &str, indices: impl IntoIterator<Item = u32>) -> Vec<WatchEvent> {
    indices
        .into_iter()
        .map(|index| WatchEvent::InstanceDeleted(instance(id, index)))
        .collect()
}

#[derive(Default)]
struct PlatformState {
    workloads: Vec<Workload>,
    services: Vec<Workload>,
    list_failures: VecDeque<ExporterError>,
    auth_failure: Option<String>,
    auth_delay: Option<Duration>,
    auth_calls: usize,
    list_calls: usize,
}

/// Discovery returning whatever the test last configured.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new(workloads: Vec<Workload>) -> Arc<Self> {
        let platform = Self::default();
        platform.state.lock().workloads = workloads;
        Arc::new(platform)
    }

    pub fn set_workloads(&self, workloads: Vec<Workload>) {
        self.state.lock().workloads = workloads;
    }

    pub fn set_services(&self, services: Vec<Workload>) {
        self.state.lock().services = services;
    }

    /// The next `list_workloads` call fails with `error`.
    pub fn fail_next_list(&self, error: ExporterError) {
        self.state.lock().list_failures.push_back(error);
    }

    /// Every `authenticate` call fails from now on.
    pub fn fail_auth(&self, message: &str) {
        self.state.lock().auth_failure = Some(message.to_string());
    }

    /// Every `authenticate` call takes `delay` before answering.
    pub fn slow_auth(&self, delay: Duration) {
        self.state.lock().auth_delay = Some(delay);
    }

    pub fn auth_calls(&self) -> usize {
        self.state.lock().auth_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn authenticate(&self) -> Result<String> {
        let delay = self.state.lock().auth_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.auth_calls += 1;
        match &state.auth_failure {
            Some(message) => Err(ExporterError::auth(message.clone())),
            None => Ok(format!("bearer token-{}", state.auth_calls)),
        }
    }

    async fn list_workloads(&self, _token: &str) -> Result<Vec<Workload>> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        match state.list_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.workloads.clone()),
        }
    }

    async fn list_services(&self, _token: &str) -> Result<Vec<Workload>> {
        Ok(self.state.lock().services.clone())
    }
}

struct Stream {
    events: mpsc::Sender<Envelope>,
    errors: mpsc::Sender<ExporterError>,
    credentials: Arc<dyn CredentialProvider>,
}

/// Transport whose streams are fed by the test.
///
/// Each subscription gets a forwarding task that stops when the subscription
/// is closed or the test ends the stream, which ends the event channel the
/// watcher reads from.
#[derive(Default)]
pub struct FakeTransport {
    streams: Mutex<HashMap<WorkloadGuid, Stream>>,
    subscriptions: Mutex<Vec<(WorkloadGuid, String)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push(&self, id: &str, envelope: Envelope) {
        let sender = self.streams.lock().get(&guid(id)).map(|s| s.events.clone());
        sender
            .expect("no open stream for workload")
            .send(envelope)
            .await
            .expect("stream closed");
    }

    pub async fn push_error(&self, id: &str, error: ExporterError) {
        let sender = self.streams.lock().get(&guid(id)).map(|s| s.errors.clone());
        sender
            .expect("no open stream for workload")
            .send(error)
            .await
            .expect("stream closed");
    }

    /// Simulate the connection dropping for good.
    pub fn end_stream(&self, id: &str) {
        self.streams.lock().remove(&guid(id));
    }

    pub fn credentials(&self, id: &str) -> Arc<dyn CredentialProvider> {
        Arc::clone(&self.streams.lock().get(&guid(id)).expect("no stream").credentials)
    }

    /// Number of subscriptions ever opened for `id`.
    pub fn subscriptions(&self, id: &str) -> usize {
        let id = guid(id);
        self.subscriptions.lock().iter().filter(|(g, _)| *g == id).count()
    }

    /// Token of the latest subscription for `id`.
    pub fn last_token(&self, id: &str) -> Option<String> {
        let id = guid(id);
        self.subscriptions
            .lock()
            .iter()
            .rev()
            .find(|(g, _)| *g == id)
            .map(|(_, token)| token.clone())
    }
}

#[async_trait]
impl EventTransport for FakeTransport {
    async fn subscribe(
        &self,
        guid: &WorkloadGuid,
        token: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Subscription> {
        let (in_events, mut in_events_rx) = mpsc::channel::<Envelope>(64);
        let (in_errors, mut in_errors_rx) = mpsc::channel::<ExporterError>(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (errors_tx, errors_rx) = mpsc::channel(64);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => break,
                    event = in_events_rx.recv() => match event {
                        Some(event) => {
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    Some(error) = in_errors_rx.recv() => {
                        let _ = errors_tx.send(error).await;
                    }
                }
            }
        });

        self.streams.lock().insert(
            guid.clone(),
            Stream {
                events: in_events,
                errors: in_errors,
                credentials,
            },
        );
        self.subscriptions.lock().push((guid.clone(), token.to_string()));

        Ok(Subscription::new(events_rx, errors_rx, close_tx))
    }
}

/// One call made on a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Gauge(Metric),
    Increment(Metric),
    Timing(Metric),
    Created(WorkloadInstance),
    Deleted(WorkloadInstance),
}

/// Sink that records every call; clones share the record.
#[derive(Clone, Default)]
pub struct RecordingSink {
    name: String,
    calls: Arc<Mutex<Vec<Call>>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Records calls but fails every one of them.
    pub fn failing(name: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Names of every metric received, in order.
    pub fn metric_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Gauge(m) | Call::Increment(m) | Call::Timing(m) => Some(m.name().to_string()),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, call: Call) -> Result<()> {
        self.calls.lock().push(call);
        if self.failing {
            return Err(ExporterError::sink(self.name.clone(), "backend unavailable"));
        }
        Ok(())
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn gauge(&mut self, metric: &Metric) -> Result<()> {
        self.record(Call::Gauge(metric.clone()))
    }

    fn increment(&mut self, metric: &Metric) -> Result<()> {
        self.record(Call::Increment(metric.clone()))
    }

    fn record_timing(&mut self, metric: &Metric) -> Result<()> {
        self.record(Call::Timing(metric.clone()))
    }

    fn instance_created(&mut self, instance: &WorkloadInstance) -> Result<()> {
        self.record(Call::Created(instance.clone()))
    }

    fn instance_deleted(&mut self, instance: &WorkloadInstance) -> Result<()> {
        self.record(Call::Deleted(instance.clone()))
    }
}
