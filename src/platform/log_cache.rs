//! Log cache polling transport.
//!
//! Each subscription polls `GET /api/v1/read/{guid}` on an interval and
//! converts the returned v2 envelopes into the closed set of event kinds.
//! Envelopes that map to no known kind are skipped.

use super::{CredentialProvider, EventTransport, Subscription};
use crate::core::{ExporterError, Result, WorkloadGuid};
use crate::events::{
    ContainerMetric, CounterEvent, Envelope, EventPayload, GaugeEvent, HttpStartStop, LogMessage,
    MessageType, PeerType,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;
const ERROR_BUFFER: usize = 16;

/// Int64 fields arrive as JSON strings.
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    envelopes: Batch,
}

#[derive(Debug, Deserialize)]
struct Batch {
    #[serde(default)]
    batch: Vec<RawEnvelope>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(deserialize_with = "int64")]
    timestamp: i64,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    gauge: Option<RawGauge>,
    #[serde(default)]
    timer: Option<RawTimer>,
    #[serde(default)]
    log: Option<RawLog>,
    #[serde(default)]
    counter: Option<RawCounter>,
}

#[derive(Debug, Deserialize)]
struct RawGauge {
    metrics: HashMap<String, RawGaugeValue>,
}

#[derive(Debug, Deserialize)]
struct RawGaugeValue {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawTimer {
    name: String,
    #[serde(deserialize_with = "int64")]
    start: i64,
    #[serde(deserialize_with = "int64")]
    stop: i64,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    #[serde(default)]
    payload: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawCounter {
    name: String,
    #[serde(default, deserialize_with = "int64")]
    delta: i64,
    #[serde(default, deserialize_with = "int64")]
    total: i64,
}

impl RawEnvelope {
    fn instance_index(&self) -> u32 {
        self.instance_id.parse().unwrap_or(0)
    }

    fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(u64::try_from(self.timestamp).unwrap_or(0))
    }

    /// Convert to a known event kind, or `None` for envelopes nothing consumes.
    fn into_envelope(self) -> Option<Envelope> {
        let payload = if let Some(gauge) = &self.gauge {
            gauge_payload(self.instance_index(), gauge)?
        } else if let Some(timer) = &self.timer {
            http_start_stop(self.instance_index(), timer, &self.tags)
                .map(EventPayload::HttpStartStop)?
        } else if let Some(log) = &self.log {
            EventPayload::LogMessage(log_message(log, &self.tags, &self.instance_id))
        } else if let Some(counter) = &self.counter {
            EventPayload::CounterEvent(CounterEvent {
                name: counter.name.clone(),
                delta: u64::try_from(counter.delta).unwrap_or(0),
                total: u64::try_from(counter.total).unwrap_or(0),
            })
        } else {
            return None;
        };

        Some(Envelope {
            timestamp: self.timestamp(),
            payload,
        })
    }
}

/// Container samples always carry cpu; any other non-empty gauge is passed
/// through by name.
fn gauge_payload(instance_index: u32, gauge: &RawGauge) -> Option<EventPayload> {
    if let Some(sample) = container_metric(instance_index, gauge) {
        return Some(EventPayload::ContainerMetric(sample));
    }
    if gauge.metrics.is_empty() {
        return None;
    }
    Some(EventPayload::Gauge(GaugeEvent {
        instance_index,
        metrics: gauge
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value))
            .collect(),
    }))
}

fn container_metric(instance_index: u32, gauge: &RawGauge) -> Option<ContainerMetric> {
    let value = |name: &str| gauge.metrics.get(name).map(|m| m.value);
    let cpu_percentage = value("cpu")?;
    let bytes = |name: &str| value(name).map(|v| v.max(0.0) as u64).unwrap_or(0);

    Some(ContainerMetric {
        instance_index,
        cpu_percentage,
        memory_bytes: bytes("memory"),
        disk_bytes: bytes("disk"),
        memory_bytes_quota: bytes("memory_quota"),
        disk_bytes_quota: bytes("disk_quota"),
    })
}

fn http_start_stop(
    instance_index: u32,
    timer: &RawTimer,
    tags: &HashMap<String, String>,
) -> Option<HttpStartStop> {
    if timer.name != "http" {
        return None;
    }
    let peer_type = match tags.get("peer_type").map(String::as_str) {
        Some(peer) if peer.eq_ignore_ascii_case("client") => PeerType::Client,
        _ => PeerType::Server,
    };
    let status_code = tags
        .get("status_code")
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);

    Some(HttpStartStop {
        instance_index,
        peer_type,
        status_code,
        start_timestamp: timer.start,
        stop_timestamp: timer.stop,
    })
}

fn log_message(log: &RawLog, tags: &HashMap<String, String>, instance_id: &str) -> LogMessage {
    let message = STANDARD
        .decode(log.payload.as_bytes())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| log.payload.clone());
    let message_type = if log.kind.eq_ignore_ascii_case("err") {
        MessageType::Err
    } else {
        MessageType::Out
    };

    LogMessage {
        message,
        message_type,
        source_type: tags.get("source_type").cloned().unwrap_or_default(),
        source_instance: instance_id.to_string(),
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Event transport backed by the platform's log cache.
pub struct LogCacheTransport {
    http: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
}

impl LogCacheTransport {
    pub fn new(endpoint: &str, poll_interval: Duration, skip_tls_verify: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(skip_tls_verify)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }
}

#[async_trait]
impl EventTransport for LogCacheTransport {
    async fn subscribe(
        &self,
        guid: &WorkloadGuid,
        token: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Subscription> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();

        let poller = Poller {
            http: self.http.clone(),
            url: format!("{}/api/v1/read/{}", self.endpoint, guid),
            guid: guid.clone(),
            token: token.to_string(),
            credentials,
            poll_interval: self.poll_interval,
            events: events_tx,
            errors: errors_tx,
        };
        tokio::spawn(poller.run(close_rx));

        Ok(Subscription::new(events_rx, errors_rx, close_tx))
    }
}

struct Poller {
    http: reqwest::Client,
    url: String,
    guid: WorkloadGuid,
    token: String,
    credentials: Arc<dyn CredentialProvider>,
    poll_interval: Duration,
    events: mpsc::Sender<Envelope>,
    errors: mpsc::Sender<ExporterError>,
}

impl Poller {
    async fn run(mut self, mut close: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Only envelopes written after the subscription opened.
        let mut start_time = now_nanos();

        loop {
            tokio::select! {
                _ = &mut close => break,
                _ = interval.tick() => {
                    match self.read(start_time).await {
                        Ok(batch) => {
                            for raw in batch {
                                start_time = start_time.max(raw.timestamp.saturating_add(1));
                                let Some(envelope) = raw.into_envelope() else {
                                    continue;
                                };
                                if self.events.send(envelope).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) if e.is_auth() => self.refresh().await,
                        Err(e) => self.report(e),
                    }
                }
            }
        }

        tracing::debug!("Log cache poller for {} stopped", self.guid);
    }

    async fn read(&self, start_time: i64) -> Result<Vec<RawEnvelope>> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("start_time", start_time.to_string())])
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .send()
            .await
            .map_err(|e| ExporterError::transport(format!("GET {} failed: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ExporterError::auth(format!("GET {} returned {}", self.url, status)));
        }
        if !status.is_success() {
            return Err(ExporterError::transport(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let body: ReadResponse = response.json().await.map_err(|e| {
            ExporterError::transport(format!("invalid envelopes from {}: {}", self.url, e))
        })?;
        Ok(body.envelopes.batch)
    }

    async fn refresh(&mut self) {
        match self.credentials.refresh_token().await {
            Ok(token) => {
                tracing::debug!("Log cache token for {} refreshed", self.guid);
                self.token = token;
            }
            Err(e) => self.report(e),
        }
    }

    fn report(&self, error: ExporterError) {
        if self.errors.try_send(error).is_err() {
            tracing::debug!("Dropping transport error for {}: error queue full", self.guid);
        }
    }
}
