use crate::domain::{InvokeError, Step, StepFailure, StepInvoker};
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{
    DomainError, Message, PipelineError, WireFormat, ERRORS_ROUTING_KEY,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Label used for error envelopes when a delivery arrives without a topic.
pub const NO_TOPIC: &str = "No Topic";

/// One inbound delivery as the host sees it.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Topic the delivery arrived on; also names the worker in error envelopes
    pub topic: Option<String>,
    pub body: Bytes,
}

impl StepRequest {
    pub fn new(topic: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic,
            body: body.into(),
        }
    }
}

/// Serialized output of an invocation and where to send it next.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResponse {
    pub routing_key: String,
    pub body: Bytes,
}

/// Runs a [`Step`] under the pipeline invocation protocol.
///
/// Parses the inbound wire form, hands the message to the step, advances the
/// pipeline on success and wraps any failure in a [`PipelineError`] routed to
/// the errors topic. Every outcome is a response; nothing is left for the
/// transport to handle.
#[derive(Clone)]
pub struct StepHost {
    step: Arc<dyn Step>,
}

impl StepHost {
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self { step }
    }

    #[instrument(skip_all, fields(label = request.topic.as_deref().unwrap_or(NO_TOPIC)))]
    pub async fn handle(&self, request: StepRequest) -> StepResponse {
        let label = request.topic.unwrap_or_else(|| NO_TOPIC.to_string());

        let original = match Message::from_wire(&request.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding unparseable message");
                return error_response(PipelineError::unparsed(&label, &e));
            }
        };

        let tracing_id = original.tracing_id.clone();
        let input = original.clone();
        let outcome = AssertUnwindSafe(async { self.step.process(input).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(panic)));

        match outcome.and_then(advance) {
            Ok(response) => {
                debug!(
                    tracing_id = %tracing_id,
                    routing_key = %response.routing_key,
                    "step completed"
                );
                response
            }
            Err(failure) => {
                warn!(
                    tracing_id = %tracing_id,
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "step failed"
                );
                let attempt = failure.attempt.unwrap_or_else(|| original.clone());
                error_response(PipelineError::new(original, attempt, &label, &failure.error))
            }
        }
    }
}

#[async_trait]
impl StepInvoker for StepHost {
    async fn invoke(&self, request: StepRequest) -> Result<StepResponse, InvokeError> {
        Ok(self.handle(request).await)
    }
}

/// A panicking step fails like any other, with the panic text as the cause.
fn panicked(panic: Box<dyn Any + Send>) -> StepFailure {
    let text = panic
        .downcast_ref::<&'static str>()
        .map(|msg| msg.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    StepFailure::new(anyhow::anyhow!("step panicked: {text}"))
}

/// Move the processed message to its next step and serialize it for that step.
fn advance(mut message: Message) -> Result<StepResponse, StepFailure> {
    let routing_key = match message.next_step() {
        Ok(step) => step.to_string(),
        Err(e) => return Err(StepFailure::new(e).with_attempt(message)),
    };

    match message.to_wire() {
        Ok(body) => Ok(StepResponse {
            routing_key,
            body: Bytes::from(body),
        }),
        Err(e) => Err(StepFailure::new(e).with_attempt(message)),
    }
}

fn error_response(envelope: PipelineError) -> StepResponse {
    let body = envelope.to_wire().unwrap_or_else(|e| {
        error!(error = %e, tracing_id = %envelope.tracing_id, "failed to serialize error envelope");
        let fallback = PipelineError::unparsed(
            envelope.worker.clone(),
            &DomainError::MalformedMessage(e.to_string()),
        );
        fallback.to_wire().unwrap_or_default()
    });

    StepResponse {
        routing_key: ERRORS_ROUTING_KEY.to_string(),
        body: Bytes::from(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockStep;
    use common::domain::UNKNOWN_TRACING_ID;

    fn wire(steps: &[&str], step_index: usize) -> Bytes {
        let mut message = Message::new(
            5,
            "secret",
            "pipeline-1",
            steps.iter().map(|s| s.to_string()).collect(),
        )
        .with_payload(b"hello".to_vec());
        message.step_index = step_index;
        Bytes::from(message.to_wire().unwrap())
    }

    fn host(step: MockStep) -> StepHost {
        StepHost::new(Arc::new(step))
    }

    fn envelope(response: &StepResponse) -> PipelineError {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_success_routes_to_next_step() {
        let mut step = MockStep::new();
        step.expect_process().times(1).returning(|mut message| {
            message.payload = b"decoded".to_vec();
            Ok(message)
        });

        let response = host(step)
            .handle(StepRequest::new(Some("a".into()), wire(&["a", "b", "c"], 0)))
            .await;

        assert_eq!(response.routing_key, "b");
        let forwarded = Message::from_wire(&response.body).unwrap();
        assert_eq!(forwarded.step_index, 1);
        assert_eq!(forwarded.payload, b"decoded");
    }

    #[tokio::test]
    async fn test_last_step_routes_to_errors() {
        let mut step = MockStep::new();
        step.expect_process().returning(Ok);

        let response = host(step)
            .handle(StepRequest::new(Some("b".into()), wire(&["a", "b"], 1)))
            .await;

        assert_eq!(response.routing_key, "errors");
        let envelope = envelope(&response);
        assert!(envelope.error.contains("NoStepsRemaining"));
        assert_eq!(envelope.received_by_worker.unwrap().step_index, 1);
        assert_eq!(envelope.processing_attempt.unwrap().step_index, 2);
    }

    #[tokio::test]
    async fn test_step_failure_keeps_original_and_attempt() {
        let mut step = MockStep::new();
        step.expect_process().returning(|mut message| {
            message.payload = b"partial".to_vec();
            Err(StepFailure::new(anyhow::anyhow!("checksum mismatch")).with_attempt(message))
        });

        let response = host(step)
            .handle(StepRequest::new(Some("decoder".into()), wire(&["decoder", "b"], 0)))
            .await;

        assert_eq!(response.routing_key, "errors");
        let envelope = envelope(&response);
        assert_eq!(envelope.worker, "decoder");
        assert_eq!(envelope.queue, "decoder");
        assert!(envelope.error.starts_with("StepFailed: "));
        assert!(envelope.error.contains("checksum mismatch"));
        assert_eq!(envelope.received_by_worker.unwrap().payload, b"hello");
        assert_eq!(envelope.processing_attempt.unwrap().payload, b"partial");
    }

    #[tokio::test]
    async fn test_failure_without_attempt_reports_input() {
        let mut step = MockStep::new();
        step.expect_process()
            .returning(|_| Err(DomainError::DeviceMatchAmbiguous("no device".into()).into()));

        let response = host(step)
            .handle(StepRequest::new(Some("a".into()), wire(&["a", "b"], 0)))
            .await;

        let envelope = envelope(&response);
        assert_eq!(envelope.received_by_worker, envelope.processing_attempt);
        assert!(envelope.error.starts_with("DeviceMatchAmbiguous: no device"));
    }

    #[tokio::test]
    async fn test_unparseable_body_yields_minimal_envelope() {
        let mut step = MockStep::new();
        step.expect_process().never();

        let response = host(step)
            .handle(StepRequest::new(None, Bytes::from_static(b"{\"tracing_id\": 1}")))
            .await;

        assert_eq!(response.routing_key, "errors");
        let envelope = envelope(&response);
        assert_eq!(envelope.tracing_id, UNKNOWN_TRACING_ID);
        assert_eq!(envelope.worker, NO_TOPIC);
        assert_eq!(envelope.queue, NO_TOPIC);
        assert!(envelope.received_by_worker.is_none());
        assert!(envelope.processing_attempt.is_none());
        assert!(envelope.error.starts_with("MissingRequiredProperties"));
    }

    /// Indexes past the end of its payload
    struct OutOfBoundsStep;

    #[async_trait]
    impl Step for OutOfBoundsStep {
        async fn process(&self, mut message: Message) -> Result<Message, StepFailure> {
            let byte = message.payload[10];
            message.payload = vec![byte];
            Ok(message)
        }
    }

    #[tokio::test]
    async fn test_panicking_step_routes_to_errors() {
        let host = StepHost::new(Arc::new(OutOfBoundsStep));
        let mut message = Message::new(5, "secret", "pipeline-1", vec!["a".into(), "b".into()]);
        message.tracing_id = "t-panic".to_string();

        let response = host
            .handle(StepRequest::new(
                Some("a".into()),
                Bytes::from(message.to_wire().unwrap()),
            ))
            .await;

        assert_eq!(response.routing_key, "errors");
        let envelope = envelope(&response);
        assert_eq!(envelope.tracing_id, "t-panic");
        assert_eq!(envelope.worker, "a");
        assert!(envelope.error.starts_with("StepFailed: "));
        assert!(envelope.error.contains("step panicked"));
        assert!(envelope.error.contains("index out of bounds"));
        assert_eq!(envelope.processing_attempt, Some(message));
    }

    #[tokio::test]
    async fn test_invoke_never_fails() {
        let mut step = MockStep::new();
        step.expect_process().returning(Ok);

        let result = host(step)
            .invoke(StepRequest::new(None, Bytes::from_static(b"garbage")))
            .await;

        assert_eq!(result.unwrap().routing_key, "errors");
    }
}
