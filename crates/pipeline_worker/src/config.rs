use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pipeline step this worker serves; also the routing key it consumes
    pub worker_id: String,

    // Step selection
    /// Name of a step compiled into the worker
    #[serde(default = "default_step")]
    pub step: String,

    /// Command line of a subprocess step, overrides `step`
    #[serde(default)]
    pub step_command: Option<String>,

    /// URL of an RPC step, overrides `step`
    #[serde(default)]
    pub step_rpc_url: Option<String>,

    /// Out-of-process step host; when set, deliveries are forwarded there
    /// instead of being processed in this process
    #[serde(default)]
    pub step_endpoint: Option<String>,

    /// Timeout for calls to a remote step or step endpoint
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream shared by every step of every pipeline
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Replica count for the stream and the worker's consumer
    #[serde(default = "default_nats_replicas")]
    pub nats_replicas: usize,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    // Startup
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Device registry
    #[serde(default)]
    pub device_registry_url: Option<String>,

    #[serde(default = "default_device_registry_timeout_secs")]
    pub device_registry_timeout_secs: u64,

    // HTTP step endpoint
    /// Also serve the step over HTTP
    #[serde(default)]
    pub http_enabled: bool,

    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // OpenTelemetry
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_step() -> String {
    "passthrough".to_string()
}

fn default_step_timeout_secs() -> u64 {
    30
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "pipeline".to_string()
}

fn default_nats_replicas() -> usize {
    1
}

fn default_nats_batch_size() -> usize {
    1
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_device_registry_timeout_secs() -> u64 {
    10
}

// HTTP defaults
fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "pipeline-worker".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("PIPELINE"))
            .build()?
            .try_deserialize()
    }

    /// Subject the worker consumes from
    pub fn filter_subject(&self) -> String {
        format!("{}.{}", self.nats_stream, self.worker_id)
    }

    /// Durable consumer name, shared by every replica of this worker
    pub fn consumer_name(&self) -> String {
        format!("worker_{}", self.worker_id)
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        let telemetry = TelemetryConfig::for_worker(&self.otel_service_name, &self.worker_id)
            .with_log_level(&self.log_level);
        if self.otel_enabled {
            telemetry.with_otel_endpoint(&self.otel_endpoint)
        } else {
            TelemetryConfig {
                otel_endpoint: self.otel_endpoint.clone(),
                ..telemetry
            }
        }
    }
}
