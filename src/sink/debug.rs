//! Sink that logs every observation instead of sending it anywhere.

use super::Sink;
use crate::core::{Result, WorkloadInstance};
use crate::metrics::{Metric, MetricValue, PathTemplate};

pub struct DebugSink {
    prefix: String,
    template: PathTemplate,
}

impl DebugSink {
    pub fn new(prefix: impl Into<String>, template: PathTemplate) -> Self {
        Self {
            prefix: prefix.into(),
            template,
        }
    }

    fn stat(&self, metric: &Metric) -> String {
        format!("{}{}", self.prefix, self.template.render(metric))
    }
}

impl Sink for DebugSink {
    fn name(&self) -> &str {
        "debug"
    }

    fn gauge(&mut self, metric: &Metric) -> Result<()> {
        if let MetricValue::Gauge(value) = metric.value() {
            tracing::info!("gauge {} {}", self.stat(metric), value);
        }
        Ok(())
    }

    fn increment(&mut self, metric: &Metric) -> Result<()> {
        if let MetricValue::Counter(value) = metric.value() {
            tracing::info!("incr {} {}", self.stat(metric), value);
        }
        Ok(())
    }

    fn record_timing(&mut self, metric: &Metric) -> Result<()> {
        if let MetricValue::Timing(value) = metric.value() {
            tracing::info!("timing {} {:?}", self.stat(metric), value);
        }
        Ok(())
    }

    fn instance_created(&mut self, instance: &WorkloadInstance) -> Result<()> {
        tracing::info!("instance created {}", instance);
        Ok(())
    }

    fn instance_deleted(&mut self, instance: &WorkloadInstance) -> Result<()> {
        tracing::info!("instance deleted {}", instance);
        Ok(())
    }
}
