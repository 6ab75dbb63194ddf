use crate::nats::StepDeliveryService;
use anyhow::Result;
use common::nats::{
    ConsumerSettings, JetStreamConsumer, JetStreamPublisher, NatsConsumeTracingConfig,
    NatsConsumeTracingLayer, NatsConsumeTracingService, NatsLoggingLayer, NatsLoggingService,
    NatsPublisherBuilder, NatsTracingConfig, TowerConsumer,
};
use std::sync::Arc;
use step_host::StepInvoker;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{debug, info};

type StepLayeredService = NatsConsumeTracingService<NatsLoggingService<StepDeliveryService>>;

/// Consumes one pipeline step's deliveries and forwards each result.
pub struct StepWorker {
    consumer: TowerConsumer<StepLayeredService>,
}

impl StepWorker {
    pub async fn new(
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher_client: Arc<dyn JetStreamPublisher>,
        invoker: Arc<dyn StepInvoker>,
        settings: ConsumerSettings,
        service_name: &str,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter = %settings.filter_subject,
            "initializing step worker"
        );

        let publisher = NatsPublisherBuilder::new(publisher_client)
            .with_tracing(NatsTracingConfig::new(service_name))
            .with_logging()
            .build();

        let delivery_service =
            StepDeliveryService::new(invoker, publisher, settings.stream_name.clone());
        let layered_service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
                "process_step",
            )))
            .layer(NatsLoggingLayer::new())
            .service(delivery_service);

        let consumer = TowerConsumer::new(consumer_client, settings, layered_service).await?;

        Ok(Self { consumer })
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        info!("starting step worker");
        self.consumer.run(ctx).await
    }
}
