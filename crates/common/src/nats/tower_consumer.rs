use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Where a [`TowerConsumer`] reads from and how much it pulls per fetch.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream_name: String,
    /// Durable consumer name, shared by every replica of the same worker
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub replicas: usize,
}

/// A JetStream pull consumer that hands every delivery to a Tower service.
///
/// Deliveries are converted to owned [`ConsumeRequest`]s and processed one at
/// a time, in order. The service's [`ConsumeResponse`] decides between ack and
/// nak; a service error is treated as a nak so the delivery comes back.
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    settings: ConsumerSettings,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter_subject = %settings.filter_subject,
            "creating tower nats consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(settings.consumer_name.clone()),
            durable_name: Some(settings.consumer_name.clone()),
            filter_subject: settings.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            num_replicas: settings.replicas,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(config, &settings.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            settings,
            service,
        })
    }

    /// Run the consumer loop until cancellation.
    ///
    /// A delivery in flight when the token fires is dropped without an ack
    /// and will be redelivered.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.settings.stream_name,
            consumer = %self.settings.consumer_name,
            filter_subject = %self.settings.filter_subject,
            "consuming"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        consumer = %self.settings.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            consumer = %self.settings.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        debug!(consumer = %self.settings.consumer_name, "consumer stopped");
        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let raw_messages = self
            .consumer
            .fetch_messages(self.settings.batch_size, self.settings.max_wait)
            .await?;

        if raw_messages.is_empty() {
            return Ok(());
        }

        debug!(message_count = raw_messages.len(), "received message batch");

        for msg in &raw_messages {
            let request = ConsumeRequest::new(
                msg.subject.to_string(),
                Bytes::copy_from_slice(&msg.payload),
                msg.headers.clone(),
            );

            let response = self.dispatch(request).await;

            match response {
                ConsumeResponse::Ack => {
                    if let Err(e) = msg.ack().await {
                        error!(subject = %msg.subject, error = %e, "failed to acknowledge message");
                    }
                }
                ConsumeResponse::Nak(reason) => {
                    warn!(
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "rejecting message"
                    );
                    if let Err(e) = msg.ack_with(jetstream::AckKind::Nak(None)).await {
                        error!(subject = %msg.subject, error = %e, "failed to reject message");
                    }
                }
                ConsumeResponse::Term(reason) => {
                    warn!(
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "terminating message"
                    );
                    if let Err(e) = msg.ack_with(jetstream::AckKind::Term).await {
                        error!(subject = %msg.subject, error = %e, "failed to terminate message");
                    }
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, request: ConsumeRequest) -> ConsumeResponse {
        let subject = request.subject.clone();
        let result = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            error!(subject = %subject, error = %e, "service error processing message");
            ConsumeResponse::nak(e.to_string())
        })
    }
}
