use crate::domain::{null_as_default, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single observed value produced by a pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Observation time in milliseconds since the epoch
    pub timestamp: i64,
    #[serde(rename = "sensor_external_id", default)]
    pub sensor_id: String,
    /// Non-finite values are written as `null` and read back as NaN
    #[serde(deserialize_with = "null_as_nan")]
    pub value: f64,
    #[serde(default)]
    pub observed_property: String,
    #[serde(rename = "unit_of_measurement", default)]
    pub unit: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Map<String, Value>,
}

fn null_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Accumulates a measurement and appends it to the owning message on `add()`.
///
/// The measurement is only visible on the message once `add()` is called.
#[must_use = "a measurement is only recorded once `add()` is called"]
pub struct MeasurementBuilder<'a> {
    message: &'a mut Message,
    measurement: Measurement,
}

impl<'a> MeasurementBuilder<'a> {
    pub(crate) fn new(message: &'a mut Message) -> Self {
        let measurement = Measurement {
            timestamp: message.timestamp,
            sensor_id: String::new(),
            value: 0.0,
            observed_property: String::new(),
            unit: String::new(),
            latitude: None,
            longitude: None,
            altitude: None,
            properties: Map::new(),
        };
        Self {
            message,
            measurement,
        }
    }

    pub fn set_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.measurement.timestamp = timestamp_ms;
        self
    }

    /// Set the timestamp from a calendar instant, at whole-second precision.
    pub fn set_time(mut self, time: DateTime<Utc>) -> Self {
        self.measurement.timestamp = time.timestamp() * 1000;
        self
    }

    pub fn set_sensor(mut self, sensor_id: impl Into<String>) -> Self {
        self.measurement.sensor_id = sensor_id.into();
        self
    }

    pub fn set_value(
        mut self,
        value: f64,
        observed_property: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        self.measurement.value = value;
        self.measurement.observed_property = observed_property.into();
        self.measurement.unit = unit.into();
        self
    }

    pub fn set_metadata(mut self, properties: Map<String, Value>) -> Self {
        self.measurement.properties = properties;
        self
    }

    pub fn set_location(mut self, latitude: f64, longitude: f64, altitude: f64) -> Self {
        self.measurement.latitude = Some(latitude);
        self.measurement.longitude = Some(longitude);
        self.measurement.altitude = Some(altitude);
        self
    }

    pub fn add(self) {
        self.message.measurements.push(self.measurement);
    }
}
