use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use super::{ConsumeRequest, ConsumeResponse, PublishRequest, PublishResponse};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Header carrying the bus message id, logged with every delivery when present.
pub const MESSAGE_ID_HEADER: &str = "Message-Id";

/// What the logging layer reports about a request crossing the bus.
pub trait LoggedRequest {
    /// `consume` or `publish`
    const DIRECTION: &'static str;

    fn subject(&self) -> &str;
    fn message_id(&self) -> Option<&str>;
    fn payload_bytes(&self) -> usize;
}

/// Outcome label for a completed request, and whether it hands the message
/// back to the bus.
pub trait LoggedResponse {
    fn outcome(&self) -> &'static str;

    fn is_rejection(&self) -> bool {
        false
    }
}

impl LoggedRequest for ConsumeRequest {
    const DIRECTION: &'static str = "consume";

    fn subject(&self) -> &str {
        &self.subject
    }

    fn message_id(&self) -> Option<&str> {
        self.header(MESSAGE_ID_HEADER)
    }

    fn payload_bytes(&self) -> usize {
        self.payload.len()
    }
}

impl LoggedResponse for ConsumeResponse {
    fn outcome(&self) -> &'static str {
        ConsumeResponse::outcome(self)
    }

    fn is_rejection(&self) -> bool {
        !self.is_ack()
    }
}

impl LoggedRequest for PublishRequest {
    const DIRECTION: &'static str = "publish";

    fn subject(&self) -> &str {
        &self.subject
    }

    fn message_id(&self) -> Option<&str> {
        self.headers.get(MESSAGE_ID_HEADER).map(|value| value.as_str())
    }

    fn payload_bytes(&self) -> usize {
        self.payload.len()
    }
}

impl LoggedResponse for PublishResponse {
    fn outcome(&self) -> &'static str {
        "published"
    }
}

/// Logs subject, message id, size, outcome and latency for every request,
/// consumed or published.
///
/// Acks and publishes log at info, naks and terms at warn, errors at error.
#[derive(Clone, Default)]
pub struct NatsLoggingLayer;

impl NatsLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsLoggingLayer {
    type Service = NatsLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsLoggingService<S> {
    inner: S,
}

impl<S, R> Service<R> for NatsLoggingService<S>
where
    R: LoggedRequest + Send + 'static,
    S: Service<R> + Clone + Send + 'static,
    S::Response: LoggedResponse + Send,
    S::Error: Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let direction = R::DIRECTION;
        let subject = req.subject().to_string();
        let message_id = req.message_id().unwrap_or_default().to_string();
        let payload_bytes = req.payload_bytes();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(response) if response.is_rejection() => {
                        let outcome = response.outcome();
                        warn!(
                            direction,
                            subject = %subject,
                            message_id = %message_id,
                            payload_bytes,
                            outcome,
                            duration_ms = %duration_ms,
                            "{direction} on {subject} rejected in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Ok(response) => {
                        let outcome = response.outcome();
                        info!(
                            direction,
                            subject = %subject,
                            message_id = %message_id,
                            payload_bytes,
                            outcome,
                            duration_ms = %duration_ms,
                            "{direction} on {subject} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => {
                        error!(
                            direction,
                            subject = %subject,
                            message_id = %message_id,
                            payload_bytes,
                            duration_ms = %duration_ms,
                            error = %e,
                            "{direction} on {subject} failed in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}
