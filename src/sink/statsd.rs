//! Statsd sink: one UDP datagram per observation, sent through a `cadence` client.

use super::Sink;
use crate::core::{ExporterError, Result, WorkloadInstance};
use crate::metrics::{Metric, MetricValue, PathTemplate};
use cadence::prelude::*;
use cadence::{MetricError, StatsdClient, UdpMetricSink};
use std::net::UdpSocket;

const NAME: &str = "statsd";

pub struct StatsdSink {
    client: StatsdClient,
    template: PathTemplate,
}

impl StatsdSink {
    /// Send to `endpoint` (`host:port`) from a non-blocking UDP socket.
    ///
    /// `prefix` is joined to every stat with a single dot, so `mycf` and
    /// `mycf.` produce the same names.
    pub fn new(endpoint: &str, prefix: impl Into<String>, template: PathTemplate) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        let sink = UdpMetricSink::from(endpoint, socket).map_err(|e| {
            ExporterError::config(format!("invalid statsd endpoint '{}': {}", endpoint, e))
        })?;
        tracing::info!("Sending statsd metrics to {}", endpoint);

        let prefix = prefix.into();
        Ok(Self::with_client(StatsdClient::from_sink(&prefix, sink), template))
    }

    /// Wrap an already configured client.
    pub fn with_client(client: StatsdClient, template: PathTemplate) -> Self {
        Self { client, template }
    }

    /// The stat name for `metric` before the prefix, e.g. `space.web.0.cpu`.
    pub fn stat(&self, metric: &Metric) -> String {
        self.template.render(metric)
    }

    fn send(&self, metric: &Metric) -> Result<()> {
        let stat = self.stat(metric);
        let sent = match metric.value() {
            MetricValue::Gauge(v) => self.client.gauge(&stat, v).map(drop),
            MetricValue::Counter(v) => self.client.count(&stat, v).map(drop),
            // Timers are sent in whole milliseconds.
            MetricValue::Timing(d) => self.client.time(&stat, d).map(drop),
        };
        sent.map_err(|e| send_error(&stat, e))
    }
}

fn send_error(stat: &str, error: MetricError) -> ExporterError {
    ExporterError::sink(NAME, format!("sending '{}': {}", stat, error))
}

impl Sink for StatsdSink {
    fn name(&self) -> &str {
        NAME
    }

    fn gauge(&mut self, metric: &Metric) -> Result<()> {
        self.send(metric)
    }

    fn increment(&mut self, metric: &Metric) -> Result<()> {
        self.send(metric)
    }

    fn record_timing(&mut self, metric: &Metric) -> Result<()> {
        self.send(metric)
    }

    // Statsd has no per-instance state.
    fn instance_created(&mut self, _instance: &WorkloadInstance) -> Result<()> {
        Ok(())
    }

    fn instance_deleted(&mut self, _instance: &WorkloadInstance) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::label;
    use std::time::Duration;

    fn listener() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    fn recv(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let n = socket.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn metric(metric: Metric) -> Metric {
        metric
            .with_label(label::APP, "web")
            .with_label(label::INSTANCE, "0")
            .with_label(label::SPACE, "dev")
    }

    #[test]
    fn test_datagrams_per_kind() {
        let template = PathTemplate::parse("{{.Space}}.{{.App}}.{{.Instance}}.{{.Metric}}").unwrap();
        let (listener, addr) = listener();
        let mut sink = StatsdSink::new(&addr, "mycf.", template).unwrap();

        sink.gauge(&metric(Metric::gauge("cpu", 70.0))).unwrap();
        sink.increment(&metric(Metric::counter("requests", 1)).with_label(label::STATUS_RANGE, "2xx"))
            .unwrap();
        sink.record_timing(&metric(Metric::timing("responseTime", Duration::from_millis(250))))
            .unwrap();

        assert_eq!(recv(&listener), "mycf.dev.web.0.cpu:70|g");
        assert_eq!(recv(&listener), "mycf.dev.web.0.requests.2xx:1|c");
        assert_eq!(recv(&listener), "mycf.dev.web.0.responseTime:250|ms");
    }

    #[test]
    fn test_empty_prefix_sends_bare_stat() {
        let (listener, addr) = listener();
        let mut sink = StatsdSink::new(&addr, "", PathTemplate::parse("{{.Metric}}").unwrap()).unwrap();

        sink.gauge(&Metric::gauge("memoryUtilization", 50.0)).unwrap();
        sink.increment(&Metric::counter("crash", 1)).unwrap();

        assert_eq!(recv(&listener), "memoryUtilization:50|g");
        assert_eq!(recv(&listener), "crash:1|c");
    }

    #[test]
    fn test_prefix_without_trailing_dot() {
        let (listener, addr) = listener();
        let mut sink = StatsdSink::new(&addr, "mycf", PathTemplate::parse("{{.App}}.{{.Metric}}").unwrap())
            .unwrap();

        sink.gauge(&metric(Metric::gauge("cpu", 12.5))).unwrap();

        assert_eq!(recv(&listener), "mycf.web.cpu:12.5|g");
    }

    #[test]
    fn test_stat_renders_template() {
        let (_listener, addr) = listener();
        let sink = StatsdSink::new(&addr, "mycf.", PathTemplate::parse("{{.App}}.{{.Metric}}").unwrap())
            .unwrap();
        assert_eq!(sink.stat(&metric(Metric::gauge("cpu", 1.0))), "web.cpu");
    }

    #[test]
    fn test_unresolvable_endpoint_is_a_config_error() {
        let err = StatsdSink::new("not a host", "", PathTemplate::parse("").unwrap()).err().unwrap();
        assert_eq!(err.category(), "config");
    }
}
