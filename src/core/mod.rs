//! Core domain types, configuration and errors.
//!
//! Everything else in the crate builds on the workload model and the
//! error taxonomy defined here.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{ExporterError, Result};
pub use types::{Workload, WorkloadGuid, WorkloadInstance, WorkloadKind};
