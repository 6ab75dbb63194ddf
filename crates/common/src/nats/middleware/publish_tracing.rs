use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::publish_types::{PublishRequest, PublishResponse};
use super::LoggedRequest;
use crate::nats::trace_context::inject_trace_context;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

#[derive(Clone, Debug, Default)]
pub struct NatsTracingConfig {
    /// Reported as `service.name` on publish spans
    pub service_name: String,
}

impl NatsTracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

/// Wraps every publish in a span and injects its context into the outgoing
/// headers, so the next worker continues the same trace.
#[derive(Clone)]
pub struct NatsPublishTracingLayer {
    config: NatsTracingConfig,
}

impl NatsPublishTracingLayer {
    pub fn new(config: NatsTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsPublishTracingLayer {
    type Service = NatsPublishTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishTracingService<S> {
    inner: S,
    config: NatsTracingConfig,
}

impl<S> Service<PublishRequest> for NatsPublishTracingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let routing_key = routing_key(&req.subject).to_string();
        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = %format!("publish {routing_key}"),
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %req.subject,
            messaging.message.id = req.message_id().unwrap_or_default(),
            messaging.message.body.size = req.payload.len(),
            pipeline.routing_key = %routing_key,
            service.name = %self.config.service_name,
            otel.status_code = field::Empty,
        );

        // the publish span, not the caller's, becomes the remote parent
        span.in_scope(|| inject_trace_context(&mut req.headers));

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                match &result {
                    Ok(_) => {
                        Span::current().record("otel.status_code", "OK");
                    }
                    Err(e) => {
                        Span::current().record("otel.status_code", "ERROR");
                        tracing::error!(error = %e, routing_key = %routing_key, "nats publish failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Routing key a subject publishes to: everything after the stream prefix.
fn routing_key(subject: &str) -> &str {
    subject
        .split_once('.')
        .map(|(_, key)| key)
        .unwrap_or(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MESSAGE_ID_HEADER;
    use bytes::Bytes;
    use tower::{service_fn, ServiceExt};

    #[test]
    fn test_routing_key_strips_stream_prefix() {
        assert_eq!(routing_key("pipeline.errors"), "errors");
        assert_eq!(routing_key("pipeline.ttn.decode"), "ttn.decode");
        assert_eq!(routing_key("errors"), "errors");
    }

    #[tokio::test]
    async fn test_keeps_caller_headers() {
        let inner = service_fn(|req: PublishRequest| async move {
            assert_eq!(
                req.headers.get(MESSAGE_ID_HEADER).map(|v| v.as_str()),
                Some("m-3")
            );
            Ok::<_, anyhow::Error>(PublishResponse {
                subject: req.subject,
            })
        });
        let svc = NatsPublishTracingLayer::new(NatsTracingConfig::new("pipeline-worker"))
            .layer(inner);

        let response = svc
            .oneshot(
                PublishRequest::new("pipeline.store", Bytes::from_static(b"{}"))
                    .with_header(MESSAGE_ID_HEADER, "m-3"),
            )
            .await
            .unwrap();

        assert_eq!(response.subject, "pipeline.store");
    }
}
