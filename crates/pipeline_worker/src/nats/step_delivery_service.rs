use anyhow::Context as _;
use common::nats::{
    ConsumeRequest, ConsumeResponse, NatsPublisher, PublishRequest, MESSAGE_ID_HEADER,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use step_host::{InvokeError, StepInvoker, StepRequest};
use tower::{Service, ServiceExt};
use tracing::{debug, warn};

/// Header stamped on every republished message, in epoch milliseconds.
pub const TIMESTAMP_HEADER: &str = "Timestamp";

/// Runs one step invocation per delivery and forwards the result.
///
/// The delivery's subject, minus the stream prefix, is the label the step
/// host reports failures under. The response is published to
/// `<stream>.<routing_key>` before the delivery is acknowledged, so a crash
/// in between produces a duplicate rather than a loss.
#[derive(Clone)]
pub struct StepDeliveryService {
    invoker: Arc<dyn StepInvoker>,
    publisher: NatsPublisher,
    stream_name: String,
}

impl StepDeliveryService {
    pub fn new(
        invoker: Arc<dyn StepInvoker>,
        publisher: NatsPublisher,
        stream_name: impl Into<String>,
    ) -> Self {
        Self {
            invoker,
            publisher,
            stream_name: stream_name.into(),
        }
    }

    fn label(&self, subject: &str) -> String {
        subject
            .strip_prefix(&self.stream_name)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(subject)
            .to_string()
    }
}

impl Service<ConsumeRequest> for StepDeliveryService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let invoker = Arc::clone(&self.invoker);
        let publisher = self.publisher.clone();
        let stream_name = self.stream_name.clone();
        let label = self.label(&req.subject);
        let message_id = req.header(MESSAGE_ID_HEADER).map(str::to_string);

        Box::pin(async move {
            let response = match invoker
                .invoke(StepRequest::new(Some(label.clone()), req.payload))
                .await
            {
                Ok(response) => response,
                Err(InvokeError::Rejected { status, body }) => {
                    warn!(label = %label, status, "step endpoint rejected delivery, dropping it");
                    return Ok(ConsumeResponse::term(format!(
                        "step endpoint returned {status}: {body}"
                    )));
                }
                Err(InvokeError::Unavailable(e)) => {
                    return Err(e.context(format!("failed to invoke step for {label}")));
                }
            };

            let subject = format!("{stream_name}.{}", response.routing_key);
            debug!(label = %label, routing_key = %response.routing_key, "forwarding step result");

            let mut publish = PublishRequest::new(subject.clone(), response.body).with_header(
                TIMESTAMP_HEADER,
                chrono::Utc::now().timestamp_millis().to_string(),
            );
            if let Some(message_id) = &message_id {
                publish = publish.with_header(MESSAGE_ID_HEADER, message_id);
            }

            publisher
                .oneshot(publish)
                .await
                .with_context(|| format!("failed to publish step result to {subject}"))?;

            Ok(ConsumeResponse::ack())
        })
    }
}
