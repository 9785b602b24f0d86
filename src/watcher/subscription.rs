//! Per-workload subscription task.

use super::{TokenStore, WatchedSet};
use crate::core::{ExporterError, Workload};
use crate::events::{EventKind, WatchEvent, WorkloadEvent};
use crate::platform::{CredentialProvider, EventTransport, Subscription};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Downstream queue is gone; nothing left to report to.
struct Disconnected;

pub(super) struct SubscriptionTask {
    pub id: u64,
    pub workload: Workload,
    pub transport: Arc<dyn EventTransport>,
    pub tokens: Arc<TokenStore>,
    pub interest: Arc<HashSet<EventKind>>,
    pub events: mpsc::Sender<WatchEvent>,
    pub errors: mpsc::UnboundedSender<ExporterError>,
    pub control: mpsc::UnboundedReceiver<Workload>,
    pub watched: WatchedSet,
}

impl SubscriptionTask {
    pub async fn run(mut self) {
        let guid = self.workload.guid.clone();
        let token = self.tokens.current();
        let credentials: Arc<dyn CredentialProvider> = self.tokens.clone();

        let mut subscription = match self.transport.subscribe(&guid, &token, credentials).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!("Failed to subscribe to workload {}: {}", guid, e);
                let _ = self.errors.send(e);
                self.unregister();
                return;
            }
        };
        tracing::debug!("Subscribed to workload {}", guid);

        if self.created(0, self.workload.instances).await.is_ok() {
            let _ = self.pump(&mut subscription).await;
        }
        subscription.close();

        // The stream has ended: every instance known to this task is gone.
        let _ = self.deleted(0, self.workload.instances).await;
        self.unregister();
        tracing::debug!("Subscription for workload {} closed", guid);
    }

    /// Forward events and apply control updates until the event stream ends.
    async fn pump(&mut self, subscription: &mut Subscription) -> Result<(), Disconnected> {
        let mut errors_open = true;
        let mut control_open = true;

        loop {
            tokio::select! {
                envelope = subscription.events.recv() => {
                    let Some(envelope) = envelope else {
                        return Ok(());
                    };
                    if self.interest.contains(&envelope.kind()) {
                        let event = WorkloadEvent {
                            envelope,
                            workload: self.workload.clone(),
                        };
                        self.send(WatchEvent::Event(event)).await?;
                    }
                }
                error = subscription.errors.recv(), if errors_open => match error {
                    Some(e) => {
                        tracing::debug!("Transport error for workload {}: {}", self.workload.guid, e);
                        let _ = self.errors.send(e);
                    }
                    None => errors_open = false,
                },
                update = self.control.recv(), if control_open => match update {
                    Some(workload) => self.update(workload).await?,
                    None => {
                        // Dropped from the watched set; the events stream
                        // ends once the transport has shut down.
                        control_open = false;
                        subscription.close();
                    }
                },
            }
        }
    }

    async fn update(&mut self, workload: Workload) -> Result<(), Disconnected> {
        let previous = self.workload.instances;
        let current = workload.instances;
        self.workload = workload;

        if current > previous {
            tracing::info!(
                "Workload {} scaled up from {} to {} instances",
                self.workload.guid,
                previous,
                current
            );
            self.created(previous, current).await?;
        } else if current < previous {
            tracing::info!(
                "Workload {} scaled down from {} to {} instances",
                self.workload.guid,
                previous,
                current
            );
            self.deleted(current, previous).await?;
        }
        Ok(())
    }

    /// Instance-created for every index in `from..to`, lowest first.
    async fn created(&self, from: u32, to: u32) -> Result<(), Disconnected> {
        for index in from..to {
            self.send(WatchEvent::InstanceCreated(self.workload.instance(index)))
                .await?;
        }
        Ok(())
    }

    /// Instance-deleted for every index in `from..to`, highest first.
    async fn deleted(&self, from: u32, to: u32) -> Result<(), Disconnected> {
        for index in (from..to).rev() {
            self.send(WatchEvent::InstanceDeleted(self.workload.instance(index)))
                .await?;
        }
        Ok(())
    }

    async fn send(&self, event: WatchEvent) -> Result<(), Disconnected> {
        self.events.send(event).await.map_err(|_| Disconnected)
    }

    /// Leave the watched set, unless a newer task already took our place.
    fn unregister(&self) {
        let mut watched = self.watched.lock();
        if watched
            .get(&self.workload.guid)
            .is_some_and(|handle| handle.id == self.id)
        {
            watched.remove(&self.workload.guid);
        }
    }
}
