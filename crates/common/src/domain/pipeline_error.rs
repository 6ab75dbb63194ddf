use crate::domain::{DomainError, Message, WireFormat};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Tracing id used when the inbound body could not be parsed into a message.
pub const UNKNOWN_TRACING_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Routing key every failed invocation is published to.
pub const ERRORS_ROUTING_KEY: &str = "errors";

/// Error envelope published to the errors topic when a step invocation fails.
///
/// Carries both the message as the worker received it and the state the step
/// left it in, so a failure can be reproduced without going back to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub tracing_id: String,
    pub received_by_worker: Option<Message>,
    pub processing_attempt: Option<Message>,
    pub worker: String,
    pub queue: String,
    /// Failure time in seconds since the epoch
    pub timestamp: i64,
    pub error: String,
}

impl PipelineError {
    /// Envelope for a failure that happened after the message was parsed.
    pub fn new(
        original: Message,
        attempt: Message,
        label: impl Into<String>,
        error: &DomainError,
    ) -> Self {
        let label = label.into();
        Self {
            tracing_id: original.tracing_id.clone(),
            received_by_worker: Some(original),
            processing_attempt: Some(attempt),
            worker: label.clone(),
            queue: label,
            timestamp: Utc::now().timestamp(),
            error: error.diagnostic(),
        }
    }

    /// Envelope for an inbound body that never became a message.
    pub fn unparsed(label: impl Into<String>, error: &DomainError) -> Self {
        let label = label.into();
        Self {
            tracing_id: UNKNOWN_TRACING_ID.to_string(),
            received_by_worker: None,
            processing_attempt: None,
            worker: label.clone(),
            queue: label,
            timestamp: Utc::now().timestamp(),
            error: error.diagnostic(),
        }
    }
}

impl WireFormat for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_new_keeps_original_and_attempt() {
        let original = Message::new(3, "token", "p", vec!["a".into(), "b".into()]);
        let mut attempt = original.clone();
        attempt.payload = b"partially decoded".to_vec();
        attempt.step_index = 1;

        let before = Utc::now().timestamp();
        let envelope = PipelineError::new(
            original.clone(),
            attempt.clone(),
            "decoder",
            &DomainError::NoStepsRemaining,
        );

        assert_eq!(envelope.tracing_id, original.tracing_id);
        assert_eq!(envelope.received_by_worker, Some(original));
        assert_eq!(envelope.processing_attempt, Some(attempt));
        assert_eq!(envelope.worker, "decoder");
        assert_eq!(envelope.queue, "decoder");
        assert!(envelope.timestamp >= before);
        assert!(envelope.error.contains("NoStepsRemaining"));
    }

    #[test]
    fn test_unparsed_uses_placeholder_tracing_id() {
        let err = DomainError::MalformedMessage("expected value".to_string());
        let envelope = PipelineError::unparsed("No Topic", &err);

        assert_eq!(envelope.tracing_id, UNKNOWN_TRACING_ID);
        assert!(envelope.received_by_worker.is_none());
        assert!(envelope.processing_attempt.is_none());
        assert_eq!(envelope.worker, "No Topic");
        assert_eq!(envelope.queue, "No Topic");
        assert!(envelope.error.starts_with("MalformedMessage"));
    }

    #[test]
    fn test_wire_form_serializes_nested_messages() {
        let original = Message::new(3, "token", "p", vec!["a".into()]).with_payload(b"hi".to_vec());
        let envelope = PipelineError::new(
            original.clone(),
            original,
            "a",
            &DomainError::UserStepInvalidReturn("\"invalid response\"".to_string()),
        );

        let value: Value = serde_json::from_slice(&envelope.to_wire().unwrap()).unwrap();
        assert_eq!(value["received_by_worker"]["payload"], "aGk=");
        assert_eq!(value["processing_attempt"]["tenant_id"], 3);
        assert_eq!(value["queue"], "a");

        let parsed: PipelineError = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, envelope);
    }
}
