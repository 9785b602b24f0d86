//! Prometheus sink.
//!
//! Keeps one series per metric identity in its own registry and serves the
//! registry on `/metrics`. Series are dropped when their instance is deleted
//! or when the activity cache sees them go quiet, so the exposition does not
//! grow without bound as instances come and go.

use super::Sink;
use crate::core::{ExporterError, Result, WorkloadInstance};
use crate::metrics::{
    prometheus_name, EvictionCallback, Labels, Metric, MetricId, MetricKind, MetricValue,
    MetricsActivityCache,
};
use ::prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use axum::extract::State as AxumState;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

const NAME: &str = "prometheus";

#[derive(Clone)]
enum Collector {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

/// All series sharing one metric name. Prometheus requires a fixed label set
/// per name, so the first observation decides it.
struct Family {
    kind: MetricKind,
    label_names: Vec<String>,
    collector: Collector,
}

impl Family {
    fn new(name: &str, kind: MetricKind, label_names: Vec<String>) -> Result<Self> {
        let help = format!("{} {}", kind.as_str(), name);
        let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let collector = match kind {
            MetricKind::Counter => Collector::Counter(CounterVec::new(Opts::new(name, help), &names)?),
            MetricKind::Gauge => Collector::Gauge(GaugeVec::new(Opts::new(name, help), &names)?),
            MetricKind::Timing => Collector::Histogram(HistogramVec::new(
                HistogramOpts::new(name, help),
                &names,
            )?),
        };
        Ok(Self {
            kind,
            label_names,
            collector,
        })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        match &self.collector {
            Collector::Counter(vec) => registry.register(Box::new(vec.clone()))?,
            Collector::Gauge(vec) => registry.register(Box::new(vec.clone()))?,
            Collector::Histogram(vec) => registry.register(Box::new(vec.clone()))?,
        }
        Ok(())
    }

    /// Label values in `label_names` order, or `None` when the key sets differ.
    fn values<'a>(&self, labels: &'a [(String, String)]) -> Option<Vec<&'a str>> {
        if labels.len() != self.label_names.len() {
            return None;
        }
        labels
            .iter()
            .zip(&self.label_names)
            .map(|((key, value), name)| (key == name).then_some(value.as_str()))
            .collect()
    }

    fn remove(&self, values: &[&str]) -> bool {
        let removed = match &self.collector {
            Collector::Counter(vec) => vec.remove_label_values(values),
            Collector::Gauge(vec) => vec.remove_label_values(values),
            Collector::Histogram(vec) => vec.remove_label_values(values),
        };
        removed.is_ok()
    }
}

/// Label pairs with Prometheus-safe keys, sorted by key.
fn presented(labels: &Labels) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = labels
        .iter()
        .map(|(key, value)| (prometheus_name(key), value.clone()))
        .collect();
    pairs.sort();
    pairs
}

struct State {
    registry: Registry,
    families: HashMap<String, Family>,
    instances: HashMap<WorkloadInstance, HashSet<MetricId>>,
}

impl State {
    fn observe(&mut self, metric: &Metric) -> Result<()> {
        let name = prometheus_name(metric.name());
        let labels = presented(metric.labels());

        if !self.families.contains_key(&name) {
            let label_names = labels.iter().map(|(key, _)| key.clone()).collect();
            let family = Family::new(&name, metric.kind(), label_names)?;
            family.register(&self.registry)?;
            tracing::debug!("Registered prometheus {} '{}'", metric.kind().as_str(), name);
            self.families.insert(name.clone(), family);
        }
        let Some(family) = self.families.get(&name) else {
            return Ok(());
        };

        if family.kind != metric.kind() {
            return Err(ExporterError::sink(
                NAME,
                format!(
                    "'{}' is a {}, cannot record a {}",
                    name,
                    family.kind.as_str(),
                    metric.kind().as_str()
                ),
            ));
        }
        let values = family.values(&labels).ok_or_else(|| {
            ExporterError::sink(
                NAME,
                format!(
                    "'{}' has labels {:?}, got {:?}",
                    name,
                    family.label_names,
                    labels.iter().map(|(key, _)| key).collect::<Vec<_>>()
                ),
            )
        })?;

        match (&family.collector, metric.value()) {
            (Collector::Counter(vec), MetricValue::Counter(value)) => {
                if value < 0 {
                    return Err(ExporterError::sink(
                        NAME,
                        format!("counter '{}' cannot decrease by {}", name, value),
                    ));
                }
                vec.get_metric_with_label_values(&values)?.inc_by(value as f64);
            }
            (Collector::Gauge(vec), MetricValue::Gauge(value)) => {
                vec.get_metric_with_label_values(&values)?.set(value);
            }
            (Collector::Histogram(vec), MetricValue::Timing(value)) => {
                vec.get_metric_with_label_values(&values)?
                    .observe(value.as_secs_f64());
            }
            _ => {}
        }

        if let Some(instance) = metric.instance() {
            self.instances.entry(instance).or_default().insert(metric.id());
        }
        Ok(())
    }

    /// Drop one series. Unknown series are ignored.
    fn remove(&mut self, id: &MetricId) -> bool {
        if let Some(instance) = id.instance() {
            if let Some(ids) = self.instances.get_mut(&instance) {
                ids.remove(id);
                if ids.is_empty() {
                    self.instances.remove(&instance);
                }
            }
        }

        let Some(family) = self.families.get(&prometheus_name(&id.name)) else {
            return false;
        };
        let labels = presented(&id.labels);
        match family.values(&labels) {
            Some(values) => family.remove(&values),
            None => false,
        }
    }
}

/// Sink exposing metrics in the Prometheus text format.
pub struct PrometheusSink {
    state: Arc<Mutex<State>>,
    registry: Registry,
    cache: MetricsActivityCache,
}

impl PrometheusSink {
    /// Create the sink and start expiry of series quiet for longer than `ttl`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let registry = Registry::new();
        let state = Arc::new(Mutex::new(State {
            registry: registry.clone(),
            families: HashMap::new(),
            instances: HashMap::new(),
        }));
        let cache = MetricsActivityCache::new(ttl, sweep_interval, expire_callback(&state));

        Self {
            state,
            registry,
            cache,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current exposition in the text format.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// Router serving `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.registry.clone())
    }

    /// Serve `/metrics` on `addr` until the task is dropped.
    pub async fn serve(router: Router, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Prometheus metrics available on http://{}/metrics", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Number of live series, across all metric names.
    pub fn series_count(&self) -> usize {
        self.registry
            .gather()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Activity cache of this sink.
    pub fn activity(&self) -> &MetricsActivityCache {
        &self.cache
    }

    fn observe(&mut self, metric: &Metric) -> Result<()> {
        // Mark the series live before touching it: an eviction already past
        // this point has removed it and the update below recreates it. The
        // eviction callback takes the state lock under the cache lock, so
        // the state lock must not be held here.
        self.cache.seen(metric.id());
        self.state.lock().observe(metric)
    }
}

fn expire_callback(state: &Arc<Mutex<State>>) -> EvictionCallback {
    let state: Weak<Mutex<State>> = Arc::downgrade(state);
    Arc::new(move |id: &MetricId| {
        if let Some(state) = state.upgrade() {
            if state.lock().remove(id) {
                tracing::debug!("Expired inactive series {} {:?}", id.name, id.labels);
            }
        }
    })
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ExporterError::sink(NAME, e.to_string()))
}

async fn metrics_handler(AxumState(registry): AxumState<Registry>) -> Response {
    match encode(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, ::prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

impl Sink for PrometheusSink {
    fn name(&self) -> &str {
        NAME
    }

    fn gauge(&mut self, metric: &Metric) -> Result<()> {
        self.observe(metric)
    }

    fn increment(&mut self, metric: &Metric) -> Result<()> {
        self.observe(metric)
    }

    fn record_timing(&mut self, metric: &Metric) -> Result<()> {
        self.observe(metric)
    }

    fn instance_created(&mut self, instance: &WorkloadInstance) -> Result<()> {
        self.state.lock().instances.entry(instance.clone()).or_default();
        Ok(())
    }

    fn instance_deleted(&mut self, instance: &WorkloadInstance) -> Result<()> {
        let removed: Vec<MetricId> = {
            let mut state = self.state.lock();
            let ids: Vec<MetricId> = state
                .instances
                .remove(instance)
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_default();
            for id in &ids {
                state.remove(id);
            }
            ids
        };

        for id in &removed {
            self.cache.forget(id);
        }
        if !removed.is_empty() {
            tracing::debug!("Removed {} series of deleted instance {}", removed.len(), instance);
        }
        Ok(())
    }
}
