//! Wires configuration, platform collaborators, watchers, dispatch and sinks.

use crate::core::{Config, ExporterError, Result};
use crate::dispatch::{AllowList, DispatchLoop};
use crate::leader::{AlwaysLeader, LeaderGate};
use crate::metrics::PathTemplate;
use crate::platform::{CloudFoundryClient, EventTransport, LogCacheTransport, PlatformClient};
use crate::sink::{DebugSink, PrometheusSink, Sink, StatsdSink};
use crate::transform::TransformRegistry;
use crate::watcher::{WatcherConfig, WatcherCoordinator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The exporter process.
pub struct Application {
    config: Config,
    platform: Arc<dyn PlatformClient>,
    transport: Arc<dyn EventTransport>,
    leader: Arc<dyn LeaderGate>,
}

impl Application {
    /// Create an application talking to Cloud Foundry and its log cache.
    pub fn new(config: Config) -> Result<Self> {
        let platform = Arc::new(CloudFoundryClient::new(&config.platform)?);
        let transport = Arc::new(LogCacheTransport::new(
            &config.log_cache_endpoint(),
            config.events.poll_interval,
            config.platform.skip_tls_verify,
        )?);

        Ok(Self::with_collaborators(
            config,
            platform,
            transport,
            Arc::new(AlwaysLeader),
        ))
    }

    /// Create an application with explicit collaborators.
    pub fn with_collaborators(
        config: Config,
        platform: Arc<dyn PlatformClient>,
        transport: Arc<dyn EventTransport>,
        leader: Arc<dyn LeaderGate>,
    ) -> Self {
        Self {
            config,
            platform,
            transport,
            leader,
        }
    }

    /// Run until ctrl-c, a fatal discovery error or loss of the leader lock.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Waiting for the leader lock");
        self.leader.acquire().await?;
        tracing::info!("Leader lock acquired, starting fleetwatch");

        let (sinks, server) = build_sinks(&self.config)?;
        let (events_tx, events_rx) = mpsc::channel(self.config.events.queue_capacity);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let coordinator = Arc::new(WatcherCoordinator::new(
            Arc::clone(&self.platform),
            Arc::clone(&self.transport),
            WatcherConfig::from(&self.config),
            events_tx,
            errors_tx,
        ));

        let (dispatch, shutdown) = DispatchLoop::new(
            TransformRegistry::with_defaults(),
            sinks,
            AllowList::new(self.config.metrics.allow_list.clone()),
            events_rx,
            errors_rx,
        );
        let dispatch_task = tokio::spawn(dispatch.run());

        let watcher = Arc::clone(&coordinator);
        let mut watcher_task = tokio::spawn(async move { watcher.run().await });

        let result = tokio::select! {
            result = &mut watcher_task => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ExporterError::from(e)),
            },
            _ = self.leader.lost() => {
                tracing::error!("Leader lock lost, stopping");
                Err(ExporterError::LeaderLost)
            }
            signal = shutdown_signal() => signal.map(|()| {
                tracing::info!("Shutdown signal received");
            }),
        };

        watcher_task.abort();
        coordinator.close_all();
        shutdown.shutdown();
        if let Err(e) = dispatch_task.await {
            tracing::warn!("Dispatch loop did not stop cleanly: {}", e);
        }
        if let Some(server) = server {
            server.abort();
        }

        result
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => tracing::debug!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Build every enabled sink. The Prometheus endpoint, when enabled, is
/// served on its own task.
pub fn build_sinks(config: &Config) -> Result<(Vec<Box<dyn Sink>>, Option<JoinHandle<()>>)> {
    let template = PathTemplate::parse(&config.metrics.template)?;
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    let mut server = None;

    if config.sinks.statsd.enabled {
        sinks.push(Box::new(StatsdSink::new(
            &config.sinks.statsd.endpoint,
            config.sinks.statsd.prefix.clone(),
            template.clone(),
        )?));
    }

    if config.sinks.debug.enabled {
        sinks.push(Box::new(DebugSink::new(
            config.sinks.statsd.prefix.clone(),
            template,
        )));
    }

    if config.sinks.prometheus.enabled {
        let sink = PrometheusSink::new(config.metrics.cache_ttl, config.metrics.sweep_interval);
        let router = sink.router();
        let addr = config.sinks.prometheus.bind_address;
        server = Some(tokio::spawn(async move {
            if let Err(e) = PrometheusSink::serve(router, addr).await {
                tracing::error!("Prometheus endpoint failed: {}", e);
            }
        }));
        sinks.push(Box::new(sink));
    }

    if sinks.is_empty() {
        return Err(ExporterError::config("no sink is enabled"));
    }
    tracing::info!(
        "Enabled sinks: {}",
        sinks.iter().map(|sink| sink.name()).collect::<Vec<_>>().join(", ")
    );

    Ok((sinks, server))
}
