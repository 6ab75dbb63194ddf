use crate::domain::{
    null_as_default, DeviceRegistry, DomainError, DomainResult, Measurement, MeasurementBuilder,
    WireFormat,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Keys that must be present on every inbound wire message, in reporting order.
pub const REQUIRED_PROPERTIES: [&str; 8] = [
    "tracing_id",
    "tenant_id",
    "access_token",
    "received_at",
    "pipeline_id",
    "step_index",
    "pipeline_steps",
    "timestamp",
];

/// The unit of work flowing through a pipeline.
///
/// A message is deserialized fresh at every hop, handed to exactly one step,
/// and serialized again for the next hop. `step_index` is the cursor into
/// `pipeline_steps` and only moves forward through [`Message::next_step`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id propagated end-to-end
    pub tracing_id: String,
    pub tenant_id: i64,
    /// Bearer token used for downstream calls made on behalf of the tenant
    pub access_token: String,
    pub received_at: i64,
    pub pipeline_id: String,
    pub step_index: usize,
    pub pipeline_steps: Vec<String>,
    /// Logical event time in milliseconds since the epoch
    pub timestamp: i64,
    #[serde(default)]
    pub device: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub measurements: Vec<Measurement>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default, with = "payload_encoding")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message at the start of a pipeline.
    pub fn new(
        tenant_id: i64,
        access_token: impl Into<String>,
        pipeline_id: impl Into<String>,
        pipeline_steps: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tracing_id: xid::new().to_string(),
            tenant_id,
            access_token: access_token.into(),
            received_at: now.timestamp(),
            pipeline_id: pipeline_id.into(),
            step_index: 0,
            pipeline_steps,
            timestamp: now.timestamp_millis(),
            device: None,
            measurements: Vec::new(),
            metadata: Map::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Parse a message from its wire form.
    ///
    /// Fails with `MissingRequiredProperties` listing every absent required key,
    /// with `MalformedPayload` when the payload is neither absent, null, nor a
    /// base64 string, and with `MalformedMessage` for anything else unparseable.
    pub fn from_wire(bytes: &[u8]) -> DomainResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::MalformedMessage(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(DomainError::MalformedMessage(
                "expected a JSON object".to_string(),
            ));
        };

        let missing: Vec<String> = REQUIRED_PROPERTIES
            .iter()
            .filter(|key| !fields.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::MissingRequiredProperties(missing));
        }

        let payload = decode_payload(fields.remove("payload"))?;

        let mut message: Message = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DomainError::MalformedMessage(e.to_string()))?;
        message.payload = payload;

        Ok(message)
    }

    /// Name of the step this message is currently at.
    pub fn current_step(&self) -> DomainResult<&str> {
        self.pipeline_steps
            .get(self.step_index)
            .map(String::as_str)
            .ok_or(DomainError::NoStepsRemaining)
    }

    /// Advance the cursor and return the name of the step it now points at.
    ///
    /// The index is incremented before the bounds check, so an exhausted
    /// pipeline still records the attempted advance. An index that cannot be
    /// incremented is exhausted too.
    pub fn next_step(&mut self) -> DomainResult<&str> {
        self.step_index = self
            .step_index
            .checked_add(1)
            .ok_or(DomainError::NoStepsRemaining)?;
        self.pipeline_steps
            .get(self.step_index)
            .map(String::as_str)
            .ok_or(DomainError::NoStepsRemaining)
    }

    /// Step names after the current one.
    pub fn remaining_steps(&self) -> &[String] {
        let start = self.step_index.saturating_add(1).min(self.pipeline_steps.len());
        &self.pipeline_steps[start..]
    }

    /// Resolve the device this message belongs to.
    ///
    /// Succeeds only when the registry returns exactly one device for the
    /// filter; zero and multiple matches both fail with `DeviceMatchAmbiguous`.
    #[instrument(skip(self, registry), fields(tracing_id = %self.tracing_id))]
    pub async fn match_device(
        &mut self,
        registry: &dyn DeviceRegistry,
        properties: Map<String, Value>,
    ) -> DomainResult<()> {
        let mut devices = registry
            .find_devices(&self.access_token, &properties)
            .await
            .map_err(DomainError::DeviceRegistryError)?;

        let filter = Value::Object(properties);
        match devices.len() {
            0 => Err(DomainError::DeviceMatchAmbiguous(format!(
                "can't find device with properties: {filter}"
            ))),
            1 => {
                debug!(filter = %filter, "matched device");
                self.device = devices.pop();
                Ok(())
            }
            count => Err(DomainError::DeviceMatchAmbiguous(format!(
                "too many devices match properties: {filter} ({count} matches)"
            ))),
        }
    }

    /// Set the logical event time, at whole-second precision.
    pub fn set_time(&mut self, time: DateTime<Utc>) -> &mut Self {
        self.timestamp = time.timestamp() * 1000;
        self
    }

    pub fn create_measurement(
        &mut self,
        value: f64,
        observed_property: impl Into<String>,
        unit: impl Into<String>,
    ) -> MeasurementBuilder<'_> {
        MeasurementBuilder::new(self).set_value(value, observed_property, unit)
    }
}

impl WireFormat for Message {}

fn decode_payload(value: Option<Value>) -> DomainResult<Vec<u8>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(encoded)) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            DomainError::MalformedPayload(format!("payload must be a base64 encoded string: {e}"))
        }),
        Some(other) => Err(DomainError::MalformedPayload(format!(
            "unexpected payload of type {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

mod payload_encoding {
    use super::*;

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        decode_payload(value).map_err(serde::de::Error::custom)
    }
}
