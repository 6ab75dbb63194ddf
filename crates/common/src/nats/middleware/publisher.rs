use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::publish_types::{PublishRequest, PublishResponse};
use super::{NatsLoggingLayer, NatsPublishTracingLayer, NatsTracingConfig};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};

/// Publish service with whatever middleware the builder was asked for.
pub type NatsPublisher = BoxCloneService<PublishRequest, PublishResponse, anyhow::Error>;

/// Innermost service: hands the request to JetStream and waits for the ack.
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);
        let subject = req.subject.clone();

        Box::pin(async move {
            publisher
                .publish_with_headers(subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse { subject })
        })
    }
}

pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: Option<NatsTracingConfig>,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            tracing_config: None,
            with_logging: false,
        }
    }

    pub fn with_tracing(mut self, config: NatsTracingConfig) -> Self {
        self.tracing_config = Some(config);
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    /// Layer order, outermost first: tracing, logging, publish
    pub fn build(self) -> NatsPublisher {
        let logging_layer = self.with_logging.then(NatsLoggingLayer::new);
        let tracing_layer = self.tracing_config.map(NatsPublishTracingLayer::new);

        let svc = ServiceBuilder::new()
            .option_layer(tracing_layer)
            .option_layer(logging_layer)
            .service(NatsPublishService::new(self.publisher));

        BoxCloneService::new(svc)
    }
}
