//! fleetwatch - workload telemetry exporter.
//!
//! Continuously discovers the workloads running on a platform, subscribes
//! to their event streams, converts events into metrics and forwards them
//! to monitoring backends.
//!
//! # Architecture
//!
//! - `watcher`: discovery polling and one subscription task per workload
//! - `dispatch`: the single loop feeding events through transforms into sinks
//! - `transform`: per-event-kind conversion into metrics
//! - `sink`: statsd, Prometheus and debug backends
//! - `metrics`: metric values, naming and TTL-based series expiry
//! - `platform`: Cloud Foundry API and log cache collaborators
//! - `core`: domain types, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use fleetwatch_lib::core::Config;
//! use fleetwatch_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod cli;
pub mod core;
pub mod dispatch;
pub mod events;
pub mod leader;
pub mod metrics;
pub mod platform;
pub mod sink;
pub mod transform;
pub mod watcher;

pub use crate::application::Application;
pub use crate::core::{Config, Result};
