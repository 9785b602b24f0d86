//! The dispatch loop: sole consumer of watcher output and sole driver of sinks.
//!
//! Events, lifecycle notifications and errors are handled one at a time on a
//! single task, so every sink sees a total order of calls.

use crate::core::{ExporterError, WorkloadInstance};
use crate::events::{WatchEvent, WorkloadEvent};
use crate::metrics::{Metric, MetricKind};
use crate::sink::Sink;
use crate::transform::TransformRegistry;
use tokio::sync::{mpsc, oneshot};

/// Metric-name prefix filter. Empty allows everything.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    prefixes: Vec<String>,
}

impl AllowList {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Counters kept by the dispatch loop, logged when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Raw events received
    pub events: u64,
    /// Events with no transform registered
    pub dropped: u64,
    /// Events whose transform failed
    pub transform_errors: u64,
    /// Metrics delivered to the sinks
    pub metrics: u64,
    /// Metrics rejected by the allow-list
    pub filtered: u64,
    /// Failed sink calls
    pub sink_errors: u64,
    pub instances_created: u64,
    pub instances_deleted: u64,
    /// Errors reported by the watchers
    pub watcher_errors: u64,
}

/// Stops a running [`DispatchLoop`]. Dropping it stops the loop as well.
pub struct ShutdownHandle(oneshot::Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(self) {
        let _ = self.0.send(());
    }
}

/// Owns the transforms, the sinks and the receiving side of every queue.
pub struct DispatchLoop {
    transforms: TransformRegistry,
    sinks: Vec<Box<dyn Sink>>,
    allow_list: AllowList,
    events: mpsc::Receiver<WatchEvent>,
    errors: mpsc::UnboundedReceiver<ExporterError>,
    shutdown: oneshot::Receiver<()>,
    stats: DispatchStats,
}

impl DispatchLoop {
    pub fn new(
        transforms: TransformRegistry,
        sinks: Vec<Box<dyn Sink>>,
        allow_list: AllowList,
        events: mpsc::Receiver<WatchEvent>,
        errors: mpsc::UnboundedReceiver<ExporterError>,
    ) -> (Self, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatch = Self {
            transforms,
            sinks,
            allow_list,
            events,
            errors,
            shutdown: shutdown_rx,
            stats: DispatchStats::default(),
        };
        (dispatch, ShutdownHandle(shutdown_tx))
    }

    /// Run until shutdown. Closed input queues are not a reason to stop.
    pub async fn run(mut self) -> DispatchStats {
        let mut events_open = true;
        let mut errors_open = true;
        tracing::info!("Dispatch loop started with {} sinks", self.sinks.len());

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown => break,
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle(event),
                    None => {
                        tracing::debug!("Event queue closed");
                        events_open = false;
                    }
                },
                error = self.errors.recv(), if errors_open => match error {
                    Some(error) => self.report(error),
                    None => errors_open = false,
                },
            }
        }

        let stats = self.stats;
        tracing::info!(
            "Dispatch loop stopped: {} events, {} metrics delivered, {} dropped, {} transform errors, {} filtered, {} sink errors",
            stats.events,
            stats.metrics,
            stats.dropped,
            stats.transform_errors,
            stats.filtered,
            stats.sink_errors
        );
        stats
    }

    /// Process one item from the watchers.
    pub fn handle(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Event(event) => self.process(event),
            WatchEvent::InstanceCreated(instance) => {
                self.stats.instances_created += 1;
                self.lifecycle(&instance, true);
            }
            WatchEvent::InstanceDeleted(instance) => {
                self.stats.instances_deleted += 1;
                self.lifecycle(&instance, false);
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn process(&mut self, event: WorkloadEvent) {
        self.stats.events += 1;
        let kind = event.kind();

        let Some(transform) = self.transforms.get(kind) else {
            self.stats.dropped += 1;
            return;
        };

        let metrics = match transform.transform(&event) {
            Ok(metrics) => metrics,
            Err(e) => {
                self.stats.transform_errors += 1;
                tracing::warn!(
                    "Dropping {} event for workload {}: {}",
                    kind,
                    event.workload.guid,
                    e
                );
                return;
            }
        };

        for metric in metrics {
            if !self.allow_list.allows(metric.name()) {
                self.stats.filtered += 1;
                continue;
            }
            self.deliver(&metric);
        }
    }

    fn deliver(&mut self, metric: &Metric) {
        self.stats.metrics += 1;
        for sink in &mut self.sinks {
            let result = match metric.kind() {
                MetricKind::Counter => sink.increment(metric),
                MetricKind::Gauge => sink.gauge(metric),
                MetricKind::Timing => sink.record_timing(metric),
            };
            if let Err(e) = result {
                self.stats.sink_errors += 1;
                tracing::warn!("Sink {} failed to record {}: {}", sink.name(), metric, e);
            }
        }
    }

    fn lifecycle(&mut self, instance: &WorkloadInstance, created: bool) {
        for sink in &mut self.sinks {
            let result = if created {
                sink.instance_created(instance)
            } else {
                sink.instance_deleted(instance)
            };
            if let Err(e) = result {
                self.stats.sink_errors += 1;
                tracing::warn!(
                    "Sink {} failed to handle {} of instance {}: {}",
                    sink.name(),
                    if created { "creation" } else { "deletion" },
                    instance,
                    e
                );
            }
        }
    }

    fn report(&mut self, error: ExporterError) {
        self.stats.watcher_errors += 1;
        if error.is_recoverable() {
            tracing::warn!("Watcher reported {} error: {}", error.category(), error);
        } else {
            tracing::error!("Watcher reported {} error: {}", error.category(), error);
        }
    }
}
