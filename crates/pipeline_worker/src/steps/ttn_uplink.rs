use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use common::domain::{null_as_default, DeviceRegistry, DomainError, DomainResult, Message};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use step_host::{Step, StepFailure};
use tracing::{debug, instrument};

/// Unpacks a The Things Network v3 uplink event.
///
/// The inbound payload is the event JSON as delivered by a TTN webhook. The
/// step takes the event time from `received_at`, records `f_port` in the
/// message metadata, adds signal measurements for every gateway that heard
/// the uplink, attaches the device matching `dev_eui`, and replaces the
/// payload with the decoded application bytes for the next step.
pub struct TtnUplinkStep {
    registry: Arc<dyn DeviceRegistry>,
}

#[derive(Debug, Deserialize)]
struct UplinkEvent {
    #[serde(default)]
    end_device_ids: Option<EndDeviceIds>,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    uplink_message: Option<UplinkMessage>,
}

#[derive(Debug, Deserialize)]
struct EndDeviceIds {
    #[serde(default)]
    dev_eui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UplinkMessage {
    #[serde(default)]
    f_port: Option<u32>,
    #[serde(default)]
    frm_payload: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    rx_metadata: Vec<GatewayMetadata>,
}

#[derive(Debug, Deserialize)]
struct GatewayMetadata {
    #[serde(default)]
    gateway_ids: Option<GatewayIds>,
    #[serde(default)]
    rssi: Option<f64>,
    #[serde(default)]
    snr: Option<f64>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GatewayIds {
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    eui: Option<String>,
}

impl GatewayIds {
    fn name(&self) -> Option<&str> {
        self.eui.as_deref().or(self.gateway_id.as_deref())
    }
}

impl TtnUplinkStep {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    async fn unpack(&self, message: &mut Message) -> DomainResult<()> {
        let event: UplinkEvent = serde_json::from_slice(&message.payload)
            .map_err(|e| DomainError::MalformedPayload(format!("not a TTN uplink event: {e}")))?;

        let Some(uplink) = event.uplink_message else {
            debug!("event carries no uplink message");
            message.payload = Vec::new();
            return Ok(());
        };

        if let Some(received_at) = event.received_at {
            message.set_time(received_at);
        }

        if let Some(f_port) = uplink.f_port {
            message.metadata.insert("f_port".to_string(), json!(f_port));
        }

        let application_payload = match uplink.frm_payload.as_deref() {
            None | Some("") => Vec::new(),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| DomainError::MalformedPayload(format!("invalid frm_payload: {e}")))?,
        };

        for gateway in &uplink.rx_metadata {
            add_gateway_measurements(message, gateway);
        }

        let dev_eui = event
            .end_device_ids
            .and_then(|ids| ids.dev_eui)
            .ok_or_else(|| {
                DomainError::MalformedPayload("uplink has no end_device_ids.dev_eui".to_string())
            })?;

        let mut filter = Map::new();
        filter.insert("dev_eui".to_string(), Value::String(dev_eui));
        message.match_device(self.registry.as_ref(), filter).await?;

        message.payload = application_payload;
        Ok(())
    }
}

fn add_gateway_measurements(message: &mut Message, gateway: &GatewayMetadata) {
    let Some(name) = gateway.gateway_ids.as_ref().and_then(GatewayIds::name) else {
        debug!("skipping gateway without identifiers");
        return;
    };
    let name = name.to_string();
    let timestamp = gateway
        .time
        .map(|time| time.timestamp() * 1000)
        .unwrap_or(message.timestamp);

    let readings = [("rssi", gateway.rssi), ("snr", gateway.snr)];
    for (property, value) in readings {
        let Some(value) = value else { continue };
        let mut properties = Map::new();
        properties.insert("gateway_eui".to_string(), Value::String(name.clone()));

        message
            .create_measurement(value, format!("{property}_{name}"), "dB")
            .set_metadata(properties)
            .set_sensor("antenna")
            .set_timestamp(timestamp)
            .add();
    }
}

#[async_trait]
impl Step for TtnUplinkStep {
    #[instrument(skip_all, fields(tracing_id = %message.tracing_id))]
    async fn process(&self, mut message: Message) -> Result<Message, StepFailure> {
        match self.unpack(&mut message).await {
            Ok(()) => Ok(message),
            Err(e) => Err(StepFailure::new(e).with_attempt(message)),
        }
    }
}
