//! Normalized metrics and the bookkeeping sinks need around them.
//!
//! - `types`: immutable metric values and series identity
//! - `activity`: TTL-based expiry of series that stopped reporting
//! - `presenter`: rendering of metric names for each backend

pub mod activity;
pub mod presenter;
pub mod types;

pub use activity::{EvictionCallback, MetricsActivityCache};
pub use presenter::{prometheus_name, snake_case, PathTemplate};
pub use types::{label, Labels, Metric, MetricId, MetricKind, MetricValue};
