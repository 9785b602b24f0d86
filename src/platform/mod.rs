//! Platform collaborators: workload discovery, credentials and event streams.
//!
//! The watcher only talks to these traits. `cloudfoundry` and `log_cache`
//! are the production implementations; tests use in-memory fakes.

pub mod cloudfoundry;
pub mod log_cache;

use crate::core::{ExporterError, Result, Workload, WorkloadGuid};
use crate::events::Envelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub use cloudfoundry::CloudFoundryClient;
pub use log_cache::LogCacheTransport;

/// Lists the workloads that should be watched.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Exchange the configured credentials for a bearer token.
    async fn authenticate(&self) -> Result<String>;

    /// Every running application, resolved to its organisation and space.
    async fn list_workloads(&self, token: &str) -> Result<Vec<Workload>>;

    /// Managed service instances. Platforms without separate services return nothing.
    async fn list_services(&self, _token: &str) -> Result<Vec<Workload>> {
        Ok(Vec::new())
    }
}

/// Hands a transport a fresh bearer token when the current one expires.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refresh_token(&self) -> Result<String>;
}

/// Opens per-workload event streams.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Subscribe to the events of one workload.
    ///
    /// `credentials` is used to re-authenticate silently when the transport
    /// sees the token rejected.
    async fn subscribe(
        &self,
        guid: &WorkloadGuid,
        token: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Subscription>;
}

/// A live event stream of one workload.
///
/// `events` ends once the transport has shut down, either because the
/// connection dropped for good or because [`Subscription::close`] was called.
/// Errors on `errors` are transient and do not end the stream.
pub struct Subscription {
    pub events: mpsc::Receiver<Envelope>,
    pub errors: mpsc::Receiver<ExporterError>,
    closer: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::Receiver<Envelope>,
        errors: mpsc::Receiver<ExporterError>,
        closer: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            errors,
            closer: Some(closer),
        }
    }

    /// Ask the transport to close the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
