use crate::core::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable platform identifier of a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadGuid(String);

impl WorkloadGuid {
    /// Creates a new WorkloadGuid after validation
    pub fn new<S: Into<String>>(guid: S) -> Result<Self> {
        let guid = guid.into();
        if guid.trim().is_empty() {
            return Err(ExporterError::discovery("workload GUID cannot be empty"));
        }
        Ok(WorkloadGuid(guid))
    }

    /// Returns the string representation of the GUID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of platform object is being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// A deployed application
    App,
    /// A managed service instance
    Service,
}

/// A deployed application or managed service instance, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub guid: WorkloadGuid,
    pub name: String,
    pub organisation: String,
    pub space: String,
    /// Desired instance count
    pub instances: u32,
    pub kind: WorkloadKind,
}

impl Workload {
    /// Convenience constructor for an application workload.
    pub fn app(guid: WorkloadGuid, name: impl Into<String>, instances: u32) -> Self {
        Self {
            guid,
            name: name.into(),
            organisation: String::new(),
            space: String::new(),
            instances,
            kind: WorkloadKind::App,
        }
    }

    /// Sets organisation and space names.
    pub fn in_space(mut self, organisation: impl Into<String>, space: impl Into<String>) -> Self {
        self.organisation = organisation.into();
        self.space = space.into();
        self
    }

    /// Returns the instance identity for the given index.
    pub fn instance(&self, index: u32) -> WorkloadInstance {
        WorkloadInstance {
            guid: self.guid.clone(),
            index,
        }
    }
}

/// One running replica of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadInstance {
    pub guid: WorkloadGuid,
    pub index: u32,
}

impl WorkloadInstance {
    pub fn new(guid: WorkloadGuid, index: u32) -> Self {
        Self { guid, index }
    }
}

impl fmt::Display for WorkloadInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guid, self.index)
    }
}
