//! Workload watcher coordination.
//!
//! The coordinator polls discovery on a fixed interval and diffs the result
//! against the set of watched workloads. Each watched workload has its own
//! subscription task (see `subscription`) which owns the transport
//! connection and the last known instance count, and reports events and
//! instance lifecycle on one ordered queue.

mod subscription;

use crate::core::{ExporterError, Result, Workload, WorkloadGuid};
use crate::events::{EventKind, WatchEvent};
use crate::platform::{CredentialProvider, EventTransport, PlatformClient};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subscription::SubscriptionTask;
use tokio::sync::mpsc;

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Time between discovery polls
    pub update_frequency: Duration,
    /// Event kinds forwarded downstream; all others are dropped silently
    pub interest: HashSet<EventKind>,
    /// Also watch managed service instances
    pub discover_services: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            update_frequency: Duration::from_secs(300),
            interest: EventKind::ALL.into_iter().collect(),
            discover_services: false,
        }
    }
}

impl From<&crate::core::Config> for WatcherConfig {
    fn from(config: &crate::core::Config) -> Self {
        Self {
            update_frequency: config.platform.update_frequency,
            interest: config.events.types.iter().copied().collect(),
            discover_services: config.platform.discover_services,
        }
    }
}

/// Current bearer token, shared by the coordinator and every transport.
///
/// Refreshes are single-flight: callers that were rejected with the same
/// token while a grant is in progress get its result instead of starting
/// their own.
pub struct TokenStore {
    platform: Arc<dyn PlatformClient>,
    token: ArcSwap<String>,
    refreshing: tokio::sync::Mutex<()>,
}

impl TokenStore {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            platform,
            token: ArcSwap::from_pointee(String::new()),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn current(&self) -> Arc<String> {
        self.token.load_full()
    }

    pub fn set(&self, token: String) {
        self.token.store(Arc::new(token));
    }
}

#[async_trait]
impl CredentialProvider for TokenStore {
    async fn refresh_token(&self) -> Result<String> {
        let rejected = self.current();
        let _grant = self.refreshing.lock().await;

        let current = self.current();
        if !Arc::ptr_eq(&current, &rejected) {
            tracing::debug!("Platform token already refreshed");
            return Ok(current.as_ref().clone());
        }

        let token = self.platform.authenticate().await?;
        self.set(token.clone());
        tracing::debug!("Refreshed platform token");
        Ok(token)
    }
}

/// Control side of one running subscription task.
struct WatchHandle {
    /// Pushes updated workload state (instance count, names) into the task.
    /// Dropping it tells the task to close its subscription.
    control: mpsc::UnboundedSender<Workload>,
    /// Distinguishes this task from a later one for the same GUID.
    id: u64,
}

type WatchedSet = Arc<Mutex<HashMap<WorkloadGuid, WatchHandle>>>;

/// What one reconcile pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: usize,
    pub updated: usize,
    pub stopped: usize,
}

/// Keeps exactly one subscription per discovered workload.
pub struct WatcherCoordinator {
    platform: Arc<dyn PlatformClient>,
    transport: Arc<dyn EventTransport>,
    tokens: Arc<TokenStore>,
    watched: WatchedSet,
    next_id: AtomicU64,
    interest: Arc<HashSet<EventKind>>,
    config: WatcherConfig,
    events: mpsc::Sender<WatchEvent>,
    errors: mpsc::UnboundedSender<ExporterError>,
}

impl WatcherCoordinator {
    /// Create a coordinator that reports on `events` and `errors`.
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        transport: Arc<dyn EventTransport>,
        config: WatcherConfig,
        events: mpsc::Sender<WatchEvent>,
        errors: mpsc::UnboundedSender<ExporterError>,
    ) -> Self {
        let tokens = Arc::new(TokenStore::new(Arc::clone(&platform)));
        Self {
            platform,
            transport,
            tokens,
            watched: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            interest: Arc::new(config.interest.clone()),
            config,
            events,
            errors,
        }
    }

    /// Authenticate, then reconcile every `update_frequency` until a fatal error.
    ///
    /// An authentication error during reconciliation leads back to
    /// authentication. Any other error, including a failed authentication,
    /// is returned.
    pub async fn run(&self) -> Result<()> {
        loop {
            let token = self.platform.authenticate().await.map_err(|e| {
                tracing::error!("Platform authentication failed: {}", e);
                e
            })?;
            self.tokens.set(token);
            tracing::info!("Authenticated against the platform API");

            loop {
                match self.reconcile().await {
                    Ok(summary) => {
                        tracing::debug!(
                            "Reconciled workloads: {} started, {} updated, {} stopped, {} watched",
                            summary.started,
                            summary.updated,
                            summary.stopped,
                            self.watched_count()
                        );
                    }
                    Err(e) if e.is_auth() => {
                        tracing::warn!("Platform token rejected, re-authenticating: {}", e);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Workload discovery failed: {}", e);
                        return Err(e);
                    }
                }

                tokio::time::sleep(self.config.update_frequency).await;
            }
        }
    }

    /// Discover workloads with the current token and reconcile against them.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let token = self.tokens.current();
        let mut workloads = self.platform.list_workloads(&token).await?;
        if self.config.discover_services {
            workloads.extend(self.platform.list_services(&token).await?);
        }
        Ok(self.reconcile_with(workloads))
    }

    /// Diff `workloads` against the watched set.
    ///
    /// New workloads get a subscription task, known ones get their current
    /// state pushed into it, and missing ones have their task told to close.
    /// Runs under the watched-set lock without doing any I/O.
    pub fn reconcile_with(&self, workloads: Vec<Workload>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut discovered: HashMap<WorkloadGuid, Workload> = HashMap::with_capacity(workloads.len());
        for workload in workloads {
            discovered.insert(workload.guid.clone(), workload);
        }

        let mut watched = self.watched.lock();

        let absent: Vec<WorkloadGuid> = watched
            .keys()
            .filter(|guid| !discovered.contains_key(*guid))
            .cloned()
            .collect();
        for guid in absent {
            watched.remove(&guid);
            tracing::info!("Workload {} is gone, closing its subscription", guid);
            summary.stopped += 1;
        }

        for (guid, workload) in discovered {
            let workload = match watched.get(&guid) {
                Some(handle) => match handle.control.send(workload) {
                    Ok(()) => {
                        summary.updated += 1;
                        continue;
                    }
                    // Task already exited; start over.
                    Err(mpsc::error::SendError(workload)) => workload,
                },
                None => {
                    tracing::info!(
                        "Watching workload {} ({}) with {} instances",
                        workload.name,
                        guid,
                        workload.instances
                    );
                    workload
                }
            };

            let handle = self.spawn_subscription(workload);
            watched.insert(guid, handle);
            summary.started += 1;
        }

        summary
    }

    fn spawn_subscription(&self, workload: Workload) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (control, control_rx) = mpsc::unbounded_channel();

        let task = SubscriptionTask {
            id,
            workload,
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            interest: Arc::clone(&self.interest),
            events: self.events.clone(),
            errors: self.errors.clone(),
            control: control_rx,
            watched: Arc::clone(&self.watched),
        };
        tokio::spawn(task.run());

        WatchHandle { control, id }
    }

    /// Whether a subscription for `guid` is currently live.
    pub fn is_watched(&self, guid: &WorkloadGuid) -> bool {
        self.watched.lock().contains_key(guid)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }

    /// Close every subscription. Each task emits its instance-deleted
    /// notifications before it exits.
    pub fn close_all(&self) {
        let closed = {
            let mut watched = self.watched.lock();
            let count = watched.len();
            watched.clear();
            count
        };
        if closed > 0 {
            tracing::info!("Closing {} workload subscriptions", closed);
        }
    }

    /// Token store handed to transports for re-authentication.
    pub fn credentials(&self) -> Arc<TokenStore> {
        Arc::clone(&self.tokens)
    }
}

impl Drop for WatcherCoordinator {
    fn drop(&mut self) {
        self.close_all();
    }
}
