//! Container resource samples → CPU, memory and disk gauges.

use super::{workload_labels, Transform};
use crate::core::{ExporterError, Result};
use crate::events::{ContainerMetric, EventPayload, WorkloadEvent};
use crate::metrics::Metric;

/// Emits `cpu`, `memoryBytes`, `diskBytes`, `memoryUtilization` and
/// `diskUtilization` gauges. Percentages are truncated to whole numbers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerMetricTransform;

impl Transform for ContainerMetricTransform {
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>> {
        let EventPayload::ContainerMetric(sample) = &event.envelope.payload else {
            return Err(ExporterError::transform(format!(
                "expected container_metric, got {}",
                event.kind()
            )));
        };

        let memory_utilization = utilization(sample.memory_bytes, sample.memory_bytes_quota)
            .ok_or_else(|| quota_error("memory", event, sample))?;
        let disk_utilization = utilization(sample.disk_bytes, sample.disk_bytes_quota)
            .ok_or_else(|| quota_error("disk", event, sample))?;

        let labels = workload_labels(&event.workload, sample.instance_index);
        let gauges = [
            ("cpu", sample.cpu_percentage.trunc()),
            ("memoryBytes", sample.memory_bytes as f64),
            ("diskBytes", sample.disk_bytes as f64),
            ("memoryUtilization", memory_utilization),
            ("diskUtilization", disk_utilization),
        ];

        Ok(gauges
            .into_iter()
            .map(|(name, value)| Metric::gauge(name, value).with_labels(&labels))
            .collect())
    }
}

/// Whole-number percentage of `quota` used, or `None` when the quota is zero.
fn utilization(used: u64, quota: u64) -> Option<f64> {
    if quota == 0 {
        return None;
    }
    Some((used as f64 / quota as f64 * 100.0).trunc())
}

fn quota_error(resource: &str, event: &WorkloadEvent, sample: &ContainerMetric) -> ExporterError {
    ExporterError::transform(format!(
        "{} quota is zero for {} instance {}",
        resource, event.workload.guid, sample.instance_index
    ))
}
