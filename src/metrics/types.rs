//! Metric value types and series identity.

use crate::core::{WorkloadGuid, WorkloadInstance};
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Label set of a metric. Ordered so identity does not depend on insertion order.
pub type Labels = BTreeMap<String, String>;

/// Well-known label keys attached by the transforms.
pub mod label {
    pub const APP: &str = "app";
    pub const GUID: &str = "guid";
    pub const INSTANCE: &str = "instance";
    pub const ORGANISATION: &str = "organisation";
    pub const SPACE: &str = "space";
    pub const STATUS_RANGE: &str = "status_range";
    /// Placement of the emitting process, when the event source reports it.
    pub const CELL_ID: &str = "cell_id";
    pub const JOB: &str = "job";
}

/// Kind of observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic increment
    Counter,
    /// Point-in-time measurement
    Gauge,
    /// Duration observation
    Timing,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Timing => "timing",
        }
    }
}

/// Value of an observation; the variant determines the [`MetricKind`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
    Timing(Duration),
}

/// One immutable observation of a series.
///
/// `(name, labels)` is the series identity; two metrics with the same
/// identity are observations of the same series over time.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    value: MetricValue,
    labels: Labels,
}

impl Metric {
    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, MetricValue::Counter(value))
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    pub fn timing(name: impl Into<String>, value: Duration) -> Self {
        Self::new(name, MetricValue::Timing(value))
    }

    fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
            labels: Labels::new(),
        }
    }

    /// Returns a copy of this metric with one more label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns a copy of this metric with all of `labels` added.
    pub fn with_labels(mut self, labels: &Labels) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn kind(&self) -> MetricKind {
        match self.value {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Timing(_) => MetricKind::Timing,
        }
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Series identity of this observation.
    pub fn id(&self) -> MetricId {
        MetricId::new(self.name.clone(), self.labels.clone())
    }

    /// Workload instance this metric belongs to, when labelled with one.
    pub fn instance(&self) -> Option<WorkloadInstance> {
        instance_of(&self.labels)
    }
}

fn instance_of(labels: &Labels) -> Option<WorkloadInstance> {
    let guid = WorkloadGuid::new(labels.get(label::GUID)?.as_str()).ok()?;
    let index = labels.get(label::INSTANCE)?.parse().ok()?;
    Some(WorkloadInstance::new(guid, index))
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind().as_str(), self.name)?;
        match self.value {
            MetricValue::Counter(v) => write!(f, "={}", v)?,
            MetricValue::Gauge(v) => write!(f, "={}", v)?,
            MetricValue::Timing(v) => write!(f, "={:?}", v)?,
        }
        if !self.labels.is_empty() {
            let labels: Vec<String> =
                self.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, " {{{}}}", labels.join(","))?;
        }
        Ok(())
    }
}

/// Identity of a series: metric name plus its full label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricId {
    pub name: String,
    pub labels: Labels,
}

impl MetricId {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Stable hash of name and sorted labels, used as the activity cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Workload instance the series belongs to, when labelled with one.
    pub fn instance(&self) -> Option<WorkloadInstance> {
        instance_of(&self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_label_insertion_order() {
        let a = Metric::gauge("cpu", 1.0)
            .with_label(label::GUID, "g1")
            .with_label(label::INSTANCE, "0");
        let b = Metric::gauge("cpu", 2.0)
            .with_label(label::INSTANCE, "0")
            .with_label(label::GUID, "g1");

        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().fingerprint(), b.id().fingerprint());
    }

    #[test]
    fn test_fingerprint_depends_on_labels_and_name() {
        let base = Metric::gauge("cpu", 1.0).with_label(label::INSTANCE, "0");
        let other_instance = Metric::gauge("cpu", 1.0).with_label(label::INSTANCE, "1");
        let other_name = Metric::gauge("memoryBytes", 1.0).with_label(label::INSTANCE, "0");

        assert_ne!(base.id().fingerprint(), other_instance.id().fingerprint());
        assert_ne!(base.id().fingerprint(), other_name.id().fingerprint());
    }

    #[test]
    fn test_instance_from_labels() {
        let metric = Metric::counter("requests", 1)
            .with_label(label::GUID, "g1")
            .with_label(label::INSTANCE, "3");
        let instance = metric.instance().unwrap();
        assert_eq!(instance.guid.as_str(), "g1");
        assert_eq!(instance.index, 3);

        assert!(Metric::counter("requests", 1).instance().is_none());
    }

    #[test]
    fn test_display() {
        let metric = Metric::counter("requests", 1).with_label(label::STATUS_RANGE, "2xx");
        assert_eq!(metric.to_string(), "counter requests=1 {status_range=2xx}");
    }
}
