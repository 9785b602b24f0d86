//! Counter events → counters named after the event.

use super::{workload_labels, Transform};
use crate::core::{ExporterError, Result};
use crate::events::{EventPayload, WorkloadEvent};
use crate::metrics::{label, Metric};

#[derive(Debug, Default, Clone, Copy)]
pub struct CounterEventTransform;

impl Transform for CounterEventTransform {
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>> {
        let EventPayload::CounterEvent(counter) = &event.envelope.payload else {
            return Err(ExporterError::transform(format!(
                "expected counter_event, got {}",
                event.kind()
            )));
        };

        if counter.name.is_empty() {
            return Err(ExporterError::transform(format!(
                "counter event without a name from {}",
                event.workload.guid
            )));
        }

        let delta = i64::try_from(counter.delta).map_err(|_| {
            ExporterError::transform(format!(
                "counter '{}' delta {} out of range",
                counter.name, counter.delta
            ))
        })?;

        // Counter events are not tied to an instance.
        let mut labels = workload_labels(&event.workload, 0);
        labels.remove(label::INSTANCE);

        Ok(vec![Metric::counter(counter.name.clone(), delta).with_labels(&labels)])
    }
}
