use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{Message, PipelineError, WireFormat};
use serde_json::{json, Value};
use std::sync::Arc;
use step_host::{CommandStep, Step, StepFailure, StepHost, StepRequest};

/// Returns its input untouched
struct Identity;

#[async_trait]
impl Step for Identity {
    async fn process(&self, message: Message) -> Result<Message, StepFailure> {
        Ok(message)
    }
}

/// Decodes a two byte big-endian temperature in tenths of a degree
struct TemperatureDecoder;

#[async_trait]
impl Step for TemperatureDecoder {
    async fn process(&self, mut message: Message) -> Result<Message, StepFailure> {
        let [hi, lo] = message.payload[..] else {
            return Err(StepFailure::new(anyhow::anyhow!(
                "expected 2 payload bytes, got {}",
                message.payload.len()
            ))
            .with_attempt(message));
        };
        let celsius = f64::from(i16::from_be_bytes([hi, lo])) / 10.0;

        message
            .create_measurement(celsius, "temperature", "Cel")
            .set_sensor("probe")
            .add();
        Ok(message)
    }
}

fn example_body() -> Bytes {
    Bytes::from(
        json!({
            "tracing_id": "t1",
            "tenant_id": 1,
            "access_token": "x",
            "received_at": 100,
            "pipeline_id": "p",
            "step_index": 0,
            "pipeline_steps": ["a", "b"],
            "timestamp": 100,
            "payload": null
        })
        .to_string(),
    )
}

#[tokio::test]
async fn test_unmodified_message_advances_to_next_step() {
    let host = StepHost::new(Arc::new(Identity));

    let response = host
        .handle(StepRequest::new(Some("a".into()), example_body()))
        .await;

    assert_eq!(response.routing_key, "b");
    let forwarded: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(forwarded["step_index"], 1);
    assert_eq!(forwarded["tracing_id"], "t1");
    assert_eq!(forwarded["payload"], "");
}

#[tokio::test]
async fn test_message_walks_whole_pipeline_then_errors() {
    let host = StepHost::new(Arc::new(Identity));

    let first = host
        .handle(StepRequest::new(Some("a".into()), example_body()))
        .await;
    let second = host
        .handle(StepRequest::new(Some(first.routing_key.clone()), first.body))
        .await;

    assert_eq!(second.routing_key, "errors");
    let envelope: PipelineError = serde_json::from_slice(&second.body).unwrap();
    assert_eq!(envelope.tracing_id, "t1");
    assert_eq!(envelope.worker, "b");
    assert!(envelope.error.starts_with("NoStepsRemaining"));
}

#[tokio::test]
async fn test_decoder_adds_measurement() {
    let host = StepHost::new(Arc::new(TemperatureDecoder));
    let message = Message::new(1, "x", "p", vec!["decode".into(), "store".into()])
        .with_payload(vec![0x01, 0x10]);

    let response = host
        .handle(StepRequest::new(
            Some("decode".into()),
            message.to_wire().unwrap(),
        ))
        .await;

    assert_eq!(response.routing_key, "store");
    let forwarded = Message::from_wire(&response.body).unwrap();
    assert_eq!(forwarded.measurements.len(), 1);
    assert_eq!(forwarded.measurements[0].value, 27.2);
    assert_eq!(forwarded.measurements[0].timestamp, message.timestamp);
}

#[tokio::test]
async fn test_decoder_failure_lands_on_errors_with_label() {
    let host = StepHost::new(Arc::new(TemperatureDecoder));
    let message =
        Message::new(1, "x", "p", vec!["decode".into(), "store".into()]).with_payload(vec![0x01]);

    let response = host
        .handle(StepRequest::new(
            Some("decode".into()),
            message.to_wire().unwrap(),
        ))
        .await;

    assert_eq!(response.routing_key, "errors");
    let envelope: PipelineError = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(envelope.worker, "decode");
    assert_eq!(envelope.queue, "decode");
    assert!(envelope.error.contains("expected 2 payload bytes, got 1"));
    assert_eq!(envelope.received_by_worker, Some(message));
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_step_returning_non_message_lands_on_errors() {
    let step = CommandStep::new(
        "sh",
        vec!["-c".into(), "cat >/dev/null; echo '{\"hello\": \"world\"}'".into()],
    );
    let host = StepHost::new(Arc::new(step));

    let response = host
        .handle(StepRequest::new(Some("enrich".into()), example_body()))
        .await;

    assert_eq!(response.routing_key, "errors");
    let envelope: PipelineError = serde_json::from_slice(&response.body).unwrap();
    assert!(envelope.error.starts_with("UserStepInvalidReturn"));
    assert_eq!(envelope.worker, "enrich");
    assert_eq!(envelope.queue, "enrich");
    assert_eq!(envelope.tracing_id, "t1");
    assert!(envelope.received_by_worker.is_some());
}
