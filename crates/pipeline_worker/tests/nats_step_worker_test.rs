#![cfg(feature = "integration-tests")]

use anyhow::Result;
use async_nats::jetstream::{self, consumer::pull::Config as PullConfig};
use async_nats::HeaderMap;
use bytes::Bytes;
use common::domain::{Message, PipelineError, WireFormat};
use common::nats::{ConsumerSettings, NatsClient, PullConsumer, MESSAGE_ID_HEADER};
use pipeline_worker::nats::TIMESTAMP_HEADER;
use pipeline_worker::step_worker::StepWorker;
use pipeline_worker::steps::PassthroughStep;
use std::sync::Arc;
use std::time::Duration;
use step_host::StepHost;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use tokio_util::sync::CancellationToken;

const STREAM: &str = "pipeline";

/// NATS with JetStream enabled
#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

async fn start_nats() -> Result<(ContainerAsync<NatsWithJetStream>, NatsClient)> {
    let container = NatsWithJetStream::default().start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(4222).await?;

    let url = format!("nats://{host}:{port}");
    let client = NatsClient::connect(&url, Duration::from_secs(10)).await?;
    client.ensure_stream(STREAM, 1).await?;

    Ok((container, client))
}

async fn start_worker(client: &NatsClient, worker_id: &str) -> Result<CancellationToken> {
    let worker = StepWorker::new(
        client.create_consumer_client(),
        client.create_publisher_client(),
        Arc::new(StepHost::new(Arc::new(PassthroughStep))),
        ConsumerSettings {
            stream_name: STREAM.to_string(),
            consumer_name: format!("worker_{worker_id}"),
            filter_subject: format!("{STREAM}.{worker_id}"),
            batch_size: 1,
            max_wait: Duration::from_millis(500),
            replicas: 1,
        },
        "pipeline-worker-test",
    )
    .await?;

    let ctx = CancellationToken::new();
    tokio::spawn(worker.run(ctx.clone()));
    Ok(ctx)
}

/// Observe what lands on a routing key
async fn watch(client: &NatsClient, routing_key: &str) -> Result<Box<dyn PullConsumer>> {
    client
        .create_consumer_client()
        .create_consumer(
            PullConfig {
                durable_name: Some(format!("observer_{routing_key}")),
                filter_subject: format!("{STREAM}.{routing_key}"),
                ack_policy: jetstream::consumer::AckPolicy::Explicit,
                ..Default::default()
            },
            STREAM,
        )
        .await
}

async fn next_message(observer: &dyn PullConsumer) -> Result<jetstream::Message> {
    for _ in 0..20 {
        let mut batch = observer.fetch_messages(1, Duration::from_millis(500)).await?;
        if let Some(msg) = batch.pop() {
            msg.ack().await.map_err(|e| anyhow::anyhow!("{e}"))?;
            return Ok(msg);
        }
    }
    anyhow::bail!("nothing arrived")
}

async fn publish(
    client: &NatsClient,
    routing_key: &str,
    message_id: &str,
    body: Vec<u8>,
) -> Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert(MESSAGE_ID_HEADER, message_id);
    client
        .create_publisher_client()
        .publish_with_headers(
            format!("{STREAM}.{routing_key}"),
            headers,
            Bytes::from(body),
        )
        .await
}

#[tokio::test]
async fn test_message_is_forwarded_to_next_step() -> Result<()> {
    let (_container, client) = start_nats().await?;
    let observer = watch(&client, "store").await?;
    let ctx = start_worker(&client, "decode").await?;

    let message = Message::new(1, "token", "p", vec!["decode".into(), "store".into()])
        .with_payload(b"raw".to_vec());
    publish(&client, "decode", "m-1", message.to_wire()?).await?;

    let forwarded = next_message(observer.as_ref()).await?;
    ctx.cancel();

    assert_eq!(forwarded.subject.as_str(), "pipeline.store");
    let headers = forwarded.headers.clone().unwrap_or_default();
    assert_eq!(
        headers.get(MESSAGE_ID_HEADER).map(|v| v.as_str()),
        Some("m-1")
    );
    assert!(headers.get(TIMESTAMP_HEADER).is_some());

    let output = Message::from_wire(&forwarded.payload)?;
    assert_eq!(output.step_index, 1);
    assert_eq!(output.tracing_id, message.tracing_id);
    assert_eq!(output.payload, b"raw");
    Ok(())
}

#[tokio::test]
async fn test_unparseable_message_is_routed_to_errors() -> Result<()> {
    let (_container, client) = start_nats().await?;
    let observer = watch(&client, "errors").await?;
    let ctx = start_worker(&client, "decode").await?;

    publish(&client, "decode", "m-2", b"{\"tenant_id\": 1}".to_vec()).await?;

    let failed = next_message(observer.as_ref()).await?;
    ctx.cancel();

    let envelope: PipelineError = serde_json::from_slice(&failed.payload)?;
    assert_eq!(envelope.worker, "decode");
    assert_eq!(envelope.queue, "decode");
    assert!(envelope.received_by_worker.is_none());
    assert!(envelope.error.starts_with("MissingRequiredProperties"));
    Ok(())
}
