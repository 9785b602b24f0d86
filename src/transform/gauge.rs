//! Named gauge events → one gauge per value.

use super::{workload_labels, Transform};
use crate::core::{ExporterError, Result};
use crate::events::{EventPayload, WorkloadEvent};
use crate::metrics::Metric;

/// Passes every value of a gauge envelope through under its own name,
/// labelled with the workload it was read for.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaugeTransform;

impl Transform for GaugeTransform {
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>> {
        let EventPayload::Gauge(gauge) = &event.envelope.payload else {
            return Err(ExporterError::transform(format!(
                "expected gauge, got {}",
                event.kind()
            )));
        };

        if gauge.metrics.contains_key("") {
            return Err(ExporterError::transform(format!(
                "gauge value without a name from {}",
                event.workload.guid
            )));
        }

        let labels = workload_labels(&event.workload, gauge.instance_index);
        Ok(gauge
            .metrics
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value).with_labels(&labels))
            .collect())
    }
}
