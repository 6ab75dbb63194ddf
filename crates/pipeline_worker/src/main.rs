use anyhow::{bail, Context};
use common::nats::{ConsumerSettings, NatsClient};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use pipeline_runner::Runner;
use pipeline_worker::config::ServiceConfig;
use pipeline_worker::step_worker::StepWorker;
use pipeline_worker::steps::build_step;
use std::sync::Arc;
use std::time::Duration;
use step_host::{router, HttpStepInvoker, StepHost, StepInvoker};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&config.telemetry()) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        worker_id = %config.worker_id,
        otel_enabled = config.otel_enabled,
        "Starting pipeline worker"
    );
    debug!("Configuration: {:?}", config);

    let nats_client = match connect_nats(&config).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to initialize NATS");
            std::process::exit(1);
        }
    };

    // The local step backs the in-process consumer and the HTTP endpoint
    let local_host = if config.step_endpoint.is_none() || config.http_enabled {
        match build_step(&config) {
            Ok(step) => Some(StepHost::new(step)),
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to build step");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let invoker = match build_invoker(&config, local_host.clone()) {
        Ok(invoker) => invoker,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to create step invoker");
            std::process::exit(1);
        }
    };

    let settings = ConsumerSettings {
        stream_name: config.nats_stream.clone(),
        consumer_name: config.consumer_name(),
        filter_subject: config.filter_subject(),
        batch_size: config.nats_batch_size,
        max_wait: Duration::from_secs(config.nats_batch_wait_secs),
        replicas: config.nats_replicas,
    };

    let step_worker = match StepWorker::new(
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        invoker,
        settings,
        &config.otel_service_name,
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to initialize step worker");
            std::process::exit(1);
        }
    };

    let mut runner =
        Runner::new().with_app_process("step_worker", move |ctx| step_worker.run(ctx));

    if config.http_enabled {
        if let Some(host) = local_host {
            let addr = format!("{}:{}", config.http_host, config.http_port);
            runner = runner.with_app_process("step_endpoint", move |ctx| {
                serve_step_endpoint(addr, host, ctx)
            });
        }
    }

    runner = runner
        .with_closer({
            let nats_for_close = Arc::clone(&nats_client);
            move || async move {
                info!("Running cleanup tasks...");
                if let Ok(client) = Arc::try_unwrap(nats_for_close) {
                    client.close().await?;
                }

                shutdown_telemetry(telemetry_providers);

                info!("Cleanup complete");
                Ok::<(), anyhow::Error>(())
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    drop(nats_client);

    runner.run().await;
}

async fn connect_nats(config: &ServiceConfig) -> anyhow::Result<NatsClient> {
    info!("Initializing NATS...");
    let client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    client
        .ensure_stream(&config.nats_stream, config.nats_replicas)
        .await
        .with_context(|| format!("failed to ensure stream {}", config.nats_stream))?;
    Ok(client)
}

/// Deliveries go to the configured step endpoint when there is one, otherwise
/// to the local step.
fn build_invoker(
    config: &ServiceConfig,
    local_host: Option<StepHost>,
) -> anyhow::Result<Arc<dyn StepInvoker>> {
    match (&config.step_endpoint, local_host) {
        (Some(endpoint), _) => {
            info!(endpoint = %endpoint, "forwarding deliveries to step endpoint");
            let invoker =
                HttpStepInvoker::new(endpoint, Duration::from_secs(config.step_timeout_secs))?;
            Ok(Arc::new(invoker))
        }
        (None, Some(host)) => Ok(Arc::new(host)),
        (None, None) => bail!("no step endpoint configured and no local step built"),
    }
}

async fn serve_step_endpoint(
    addr: String,
    host: StepHost,
    ctx: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind step endpoint on {addr}"))?;
    info!(addr = %addr, "serving step over HTTP");

    axum::serve(listener, router(host))
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await
        .context("step endpoint server failed")
}
