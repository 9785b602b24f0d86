//! Event-to-metric transforms.
//!
//! One strategy per [`EventKind`]. The dispatch loop looks the strategy up by
//! the envelope's kind; kinds without a registered strategy are dropped.

pub mod container;
pub mod counter;
pub mod gauge;
pub mod http;
pub mod log_message;

use crate::core::{Result, Workload};
use crate::events::{EventKind, WorkloadEvent};
use crate::metrics::{label, Labels, Metric};
use std::collections::HashMap;

pub use container::ContainerMetricTransform;
pub use counter::CounterEventTransform;
pub use gauge::GaugeTransform;
pub use http::HttpStartStopTransform;
pub use log_message::LogMessageTransform;

/// Converts one raw event into zero or more metrics.
pub trait Transform: Send + Sync {
    /// On error nothing produced for the event may be forwarded.
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>>;
}

/// Lookup table from event kind to its transform.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<EventKind, Box<dyn Transform>>,
}

impl TransformRegistry {
    /// An empty registry; every event is dropped.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in transform for every known event kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EventKind::ContainerMetric, Box::new(ContainerMetricTransform));
        registry.register(EventKind::HttpStartStop, Box::new(HttpStartStopTransform));
        registry.register(EventKind::LogMessage, Box::new(LogMessageTransform));
        registry.register(EventKind::CounterEvent, Box::new(CounterEventTransform));
        registry.register(EventKind::Gauge, Box::new(GaugeTransform));
        registry
    }

    /// Register (or replace) the transform for `kind`.
    pub fn register(&mut self, kind: EventKind, transform: Box<dyn Transform>) {
        self.transforms.insert(kind, transform);
    }

    pub fn get(&self, kind: EventKind) -> Option<&dyn Transform> {
        self.transforms.get(&kind).map(|t| t.as_ref())
    }

    /// Event kinds that have a transform.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.transforms.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

/// Labels every transform attaches: workload identity and placement.
pub(crate) fn workload_labels(workload: &Workload, instance_index: u32) -> Labels {
    let mut labels = Labels::new();
    labels.insert(label::APP.to_string(), workload.name.clone());
    labels.insert(label::GUID.to_string(), workload.guid.to_string());
    labels.insert(label::INSTANCE.to_string(), instance_index.to_string());
    labels.insert(label::ORGANISATION.to_string(), workload.organisation.clone());
    labels.insert(label::SPACE.to_string(), workload.space.clone());
    labels
}
