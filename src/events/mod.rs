//! Raw events received from workload streams.
//!
//! The set of event kinds is closed and defined by the platform, so
//! envelopes are a plain enum rather than an open-ended message type.

use crate::core::{ExporterError, Workload, WorkloadInstance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Tag of a raw event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Container resource sample
    ContainerMetric,
    /// HTTP transaction record
    HttpStartStop,
    /// Log line
    LogMessage,
    /// Counter increment
    CounterEvent,
    /// Named gauge values, such as those reported by managed services
    Gauge,
}

impl EventKind {
    /// Every known event kind.
    pub const ALL: [EventKind; 5] = [
        EventKind::ContainerMetric,
        EventKind::HttpStartStop,
        EventKind::LogMessage,
        EventKind::CounterEvent,
        EventKind::Gauge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ContainerMetric => "container_metric",
            EventKind::HttpStartStop => "http_start_stop",
            EventKind::LogMessage => "log_message",
            EventKind::CounterEvent => "counter_event",
            EventKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExporterError::config(format!("unknown event type '{}'", s)))
    }
}

/// Resource usage sample of one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMetric {
    pub instance_index: u32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_bytes_quota: u64,
    pub disk_bytes_quota: u64,
}

/// Which side of an HTTP exchange emitted the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    Client,
    Server,
}

/// One completed HTTP transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpStartStop {
    pub instance_index: u32,
    pub peer_type: PeerType,
    pub status_code: u16,
    /// Nanoseconds since the epoch
    pub start_timestamp: i64,
    /// Nanoseconds since the epoch
    pub stop_timestamp: i64,
}

/// Stream a log line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Out,
    Err,
}

/// A single log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub message: String,
    pub message_type: MessageType,
    pub source_type: String,
    pub source_instance: String,
}

/// A counter increment.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

/// Gauge values that are not a container sample, keyed by metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeEvent {
    pub instance_index: u32,
    pub metrics: BTreeMap<String, f64>,
}

/// Payload of an envelope; one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ContainerMetric(ContainerMetric),
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    CounterEvent(CounterEvent),
    Gauge(GaugeEvent),
}

/// A tagged event as delivered by the event transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub timestamp: SystemTime,
    pub payload: EventPayload,
}

impl Envelope {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: SystemTime::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::ContainerMetric(_) => EventKind::ContainerMetric,
            EventPayload::HttpStartStop(_) => EventKind::HttpStartStop,
            EventPayload::LogMessage(_) => EventKind::LogMessage,
            EventPayload::CounterEvent(_) => EventKind::CounterEvent,
            EventPayload::Gauge(_) => EventKind::Gauge,
        }
    }
}

/// An envelope tagged with the workload it was read for.
///
/// The transport only knows the GUID it subscribed to, so the watcher
/// attaches the rest of the workload context.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEvent {
    pub envelope: Envelope,
    pub workload: Workload,
}

impl WorkloadEvent {
    pub fn kind(&self) -> EventKind {
        self.envelope.kind()
    }
}

/// Everything the watchers hand to the dispatch loop, in per-workload order.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Event(WorkloadEvent),
    InstanceCreated(WorkloadInstance),
    InstanceDeleted(WorkloadInstance),
}
