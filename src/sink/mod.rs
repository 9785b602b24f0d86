//! Monitoring backends.
//!
//! Every sink receives each metric through the method matching its kind,
//! and instance lifecycle notifications in the order the watchers emitted
//! them. All calls come from the single dispatch task.

pub mod debug;
pub mod prometheus;
pub mod statsd;

use crate::core::{Result, WorkloadInstance};
use crate::metrics::Metric;

pub use self::debug::DebugSink;
pub use self::prometheus::PrometheusSink;
pub use self::statsd::StatsdSink;

/// A downstream consumer of metrics and instance lifecycle.
///
/// Calls must not block for long: they run on the dispatch task.
pub trait Sink: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    fn gauge(&mut self, metric: &Metric) -> Result<()>;

    fn increment(&mut self, metric: &Metric) -> Result<()>;

    fn record_timing(&mut self, metric: &Metric) -> Result<()>;

    /// Called before any metric of `instance` is delivered.
    fn instance_created(&mut self, instance: &WorkloadInstance) -> Result<()>;

    /// Called after the last metric of `instance` was delivered.
    fn instance_deleted(&mut self, instance: &WorkloadInstance) -> Result<()>;
}
