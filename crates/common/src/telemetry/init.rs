use anyhow::{Context, Result};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::LoggerProvider,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing::Subscriber;
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::TelemetryConfig;

/// Held until shutdown so buffered spans and logs get flushed.
pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}

/// Install the global tracing subscriber.
///
/// Always logs JSON to stdout. With OTEL enabled, spans and log events are
/// also exported over OTLP and the W3C propagator is registered so trace
/// context survives the hop across the bus.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<TelemetryProviders>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_stdout_layer())
            .try_init()
            .context("failed to install tracing subscriber")?;
        return Ok(None);
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new(resource_attributes(config));

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()
        .context("failed to build OTLP log exporter")?;

    let logger_provider = LoggerProvider::builder()
        .with_batch_exporter(log_exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    // span layer before the log bridge so events see the OTel context
    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .with(json_stdout_layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(Some(TelemetryProviders {
        tracer_provider,
        logger_provider,
    }))
}

fn resource_attributes(config: &TelemetryConfig) -> Vec<KeyValue> {
    use opentelemetry_semantic_conventions::resource::{SERVICE_INSTANCE_ID, SERVICE_NAME};

    let mut attributes = vec![KeyValue::new(SERVICE_NAME, config.service_name.clone())];
    if let Some(worker_id) = &config.worker_id {
        attributes.push(KeyValue::new(SERVICE_INSTANCE_ID, worker_id.clone()));
    }
    attributes
}

/// JSON lines on stdout, built per subscriber stack it is layered onto.
fn json_stdout_layer<S>() -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_span_list(true)
        .with_current_span(true)
}

/// Flush and shut down the OTLP exporters, if any were installed
pub fn shutdown_telemetry(providers: Option<TelemetryProviders>) {
    if let Some(providers) = providers {
        if let Err(e) = providers.tracer_provider.shutdown() {
            eprintln!("error shutting down tracer provider: {e:?}");
        }
        if let Err(e) = providers.logger_provider.shutdown() {
            eprintln!("error shutting down logger provider: {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_the_worker() {
        let config = TelemetryConfig::for_worker("pipeline-worker", "decode");
        let attributes = resource_attributes(&config);
        let keys: Vec<&str> = attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["service.name", "service.instance.id"]);

        let attributes = resource_attributes(&TelemetryConfig::default());
        assert_eq!(attributes.len(), 1);
    }

    #[test]
    fn test_stdout_layer_stacks_on_log_bridge() {
        let logger_provider = LoggerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(OpenTelemetryTracingBridge::new(&logger_provider))
            .with(json_stdout_layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(message_id = "m-1", "delivery handled");
        });
    }

    #[test]
    fn test_init_without_otel_installs_stdout_only() {
        let config = TelemetryConfig::default().with_log_level("warn");

        let providers = init_telemetry(&config).unwrap();

        assert!(providers.is_none());
    }

    #[test]
    fn test_shutdown_without_providers_is_noop() {
        shutdown_telemetry(None);
    }
}
