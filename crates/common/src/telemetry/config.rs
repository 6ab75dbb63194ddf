/// How a worker reports logs, spans and exported telemetry.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Reported as `service.instance.id`, so traces from each step's worker
    /// can be told apart
    pub worker_id: Option<String>,
    pub otel_endpoint: String,
    pub otel_enabled: bool,
    /// Fallback filter directive when `RUST_LOG` is unset
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn for_worker(service_name: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            worker_id: Some(worker_id.into()),
            ..Self::default()
        }
    }

    pub fn with_otel_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otel_endpoint = endpoint.into();
        self.otel_enabled = true;
        self
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pipeline-worker".to_string(),
            worker_id: None,
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
        }
    }
}
