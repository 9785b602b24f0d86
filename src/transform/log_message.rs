//! Platform log lines → crash counters.

use super::{workload_labels, Transform};
use crate::core::{ExporterError, Result};
use crate::events::{EventPayload, MessageType, WorkloadEvent};
use crate::metrics::Metric;
use serde::Deserialize;

const EXIT_PREFIX: &str = "App instance exited with guid ";
const PAYLOAD_MARKER: &str = " payload: {";

/// Counts instance crashes reported by the platform's API component.
///
/// The exit line carries a Ruby-hash style payload
/// (`{"index"=>0, "reason"=>"CRASHED", ...}`); only `CRASHED` exits count.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessageTransform;

#[derive(Debug, Deserialize)]
struct ExitPayload {
    index: u32,
    reason: String,
}

impl Transform for LogMessageTransform {
    fn transform(&self, event: &WorkloadEvent) -> Result<Vec<Metric>> {
        let EventPayload::LogMessage(log) = &event.envelope.payload else {
            return Err(ExporterError::transform(format!(
                "expected log_message, got {}",
                event.kind()
            )));
        };

        if log.source_type != "API" || log.message_type != MessageType::Out {
            return Ok(Vec::new());
        }
        if !log.message.starts_with(EXIT_PREFIX) {
            return Ok(Vec::new());
        }

        let payload = exit_payload(&log.message)?;
        if payload.reason != "CRASHED" {
            return Ok(Vec::new());
        }

        let labels = workload_labels(&event.workload, payload.index);
        Ok(vec![Metric::counter("crash", 1).with_labels(&labels)])
    }
}

fn exit_payload(message: &str) -> Result<ExitPayload> {
    let start = message.find(PAYLOAD_MARKER).ok_or_else(|| {
        ExporterError::transform(format!(
            "unable to find start of payload in app instance exit log: {}",
            message
        ))
    })?;
    // Keep the opening brace.
    let payload = &message[start + PAYLOAD_MARKER.len() - 1..];
    let json = payload.replace("=>", ":");

    serde_json::from_str(&json).map_err(|e| {
        ExporterError::transform(format!(
            "unable to parse payload in app instance exit log: {}",
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogMessage;
    use crate::metrics::{label, MetricValue};
    use crate::transform::test_support::event;

    fn log(message: &str) -> EventPayload {
        EventPayload::LogMessage(LogMessage {
            message: message.to_string(),
            message_type: MessageType::Out,
            source_type: "API".to_string(),
            source_instance: "0".to_string(),
        })
    }

    fn exit_line(reason: &str) -> String {
        format!(
            "App instance exited with guid 4630f6ba-8ddc-41f1-afea-1905332d6660 payload: \
             {{\"cc_partition\"=>\"default\", \"index\"=>1, \"reason\"=>\"{}\", \
             \"exit_status\"=>2, \"crash_timestamp\"=>1512569260335558205}}",
            reason
        )
    }

    #[test]
    fn test_crash_is_counted() {
        let metrics = LogMessageTransform.transform(&event(log(&exit_line("CRASHED")))).unwrap();

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name(), "crash");
        assert_eq!(metrics[0].value(), MetricValue::Counter(1));
        assert_eq!(metrics[0].label(label::INSTANCE), Some("1"));
    }

    #[test]
    fn test_clean_exit_is_ignored() {
        let metrics = LogMessageTransform.transform(&event(log(&exit_line("STOPPED")))).unwrap();
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_other_sources_are_ignored() {
        let mut payload = log(&exit_line("CRASHED"));
        if let EventPayload::LogMessage(log) = &mut payload {
            log.source_type = "APP/PROC/WEB".to_string();
        }
        assert!(LogMessageTransform.transform(&event(payload)).unwrap().is_empty());

        assert!(LogMessageTransform
            .transform(&event(log("Updated app with guid abc")))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_payload_is_an_error() {
        let result = LogMessageTransform
            .transform(&event(log("App instance exited with guid abc and no payload")));
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let result = LogMessageTransform.transform(&event(log(
            "App instance exited with guid abc payload: {\"index\"=>}",
        )));
        assert!(result.is_err());
    }
}
