//! HTTP transaction records → request counters and response timings.

use super::{workload_labels, Transform};
use crate::core::{ExporterError, Result};
use crate::events::{EventPayload, HttpStartStop, PeerType, WorkloadEvent};
use crate::metrics::{label, Metric};
use std::time::Duration;

/// Emits a `requests` counter and a `responseTime` timing per client-side
/// record, both labelled with the status range. Server-side records are
/// ignored so each request is only counted once.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpStartStopTransform;

impl Transform for HttpStartStopTransform {
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>> {
        let EventPayload::HttpStartStop(record) = &event.envelope.payload else {
            return Err(ExporterError::transform(format!(
                "expected http_start_stop, got {}",
                event.kind()
            )));
        };

        if record.peer_type != PeerType::Client {
            return Ok(Vec::new());
        }

        let elapsed = elapsed(record).ok_or_else(|| {
            ExporterError::transform(format!(
                "http record for {} stops before it starts ({} < {})",
                event.workload.guid, record.stop_timestamp, record.start_timestamp
            ))
        })?;

        let labels = workload_labels(&event.workload, record.instance_index);
        let range = status_range(record.status_code);

        Ok(vec![
            Metric::counter("requests", 1)
                .with_labels(&labels)
                .with_label(label::STATUS_RANGE, range),
            Metric::timing("responseTime", elapsed)
                .with_labels(&labels)
                .with_label(label::STATUS_RANGE, range),
        ])
    }
}

fn elapsed(record: &HttpStartStop) -> Option<Duration> {
    let nanos = record.stop_timestamp.checked_sub(record.start_timestamp)?;
    u64::try_from(nanos).ok().map(Duration::from_nanos)
}

/// `1xx` … `5xx`, or `other` for anything outside 100..600.
pub fn status_range(status_code: u16) -> &'static str {
    match status_code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;
    use crate::transform::test_support::event;

    fn record(peer_type: PeerType, status_code: u16) -> HttpStartStop {
        HttpStartStop {
            instance_index: 1,
            peer_type,
            status_code,
            start_timestamp: 1_000_000_000,
            stop_timestamp: 1_250_000_000,
        }
    }

    #[test]
    fn test_client_record_emits_count_and_timing() {
        let metrics = HttpStartStopTransform
            .transform(&event(EventPayload::HttpStartStop(record(PeerType::Client, 204))))
            .unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name(), "requests");
        assert_eq!(metrics[0].value(), MetricValue::Counter(1));
        assert_eq!(metrics[0].label(label::STATUS_RANGE), Some("2xx"));
        assert_eq!(metrics[0].label(label::INSTANCE), Some("1"));
        assert_eq!(metrics[1].name(), "responseTime");
        assert_eq!(metrics[1].value(), MetricValue::Timing(Duration::from_millis(250)));
    }

    #[test]
    fn test_server_record_is_ignored() {
        let metrics = HttpStartStopTransform
            .transform(&event(EventPayload::HttpStartStop(record(PeerType::Server, 200))))
            .unwrap();
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_negative_duration_is_an_error() {
        let mut record = record(PeerType::Client, 200);
        record.stop_timestamp = 0;
        let result = HttpStartStopTransform.transform(&event(EventPayload::HttpStartStop(record)));
        assert!(result.is_err());
    }

    #[test]
    fn test_status_ranges() {
        assert_eq!(status_range(99), "other");
        assert_eq!(status_range(101), "1xx");
        assert_eq!(status_range(302), "3xx");
        assert_eq!(status_range(404), "4xx");
        assert_eq!(status_range(503), "5xx");
        assert_eq!(status_range(600), "other");
    }
}
