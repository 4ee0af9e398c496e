//! JSON wire encoding of the two message kinds.
//!
//! Messages are flat objects with camelCase keys:
//!
//! ```text
//! TelemetryReport: {"name":"sensor-1a2b","temperature":22.5,"humidity":40.0,"tempThreshold":25.0,"heater":false}
//! ControlCommand:  {"tempThreshold":25.0,"heaterOverride":false,"heater":false}
//! ```
//!
//! Decoding produces an update in which every field is optional. Absent keys leave the
//! target untouched, so a peer can announce itself with just `{"name":"..."}`. An update
//! is applied only after the whole payload validated.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Threshold a fresh slot or peer starts with (°C).
pub const DEFAULT_TEMP_THRESHOLD: f32 = 25.0;

/// Sensor telemetry a peer pushes every sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    pub name: String,
    pub temperature: f32,
    pub humidity: f32,
    pub temp_threshold: f32,
    pub heater: bool,
}

impl Default for TelemetryReport {
    fn default() -> Self {
        Self {
            name: String::new(),
            temperature: 0.0,
            humidity: 0.0,
            temp_threshold: DEFAULT_TEMP_THRESHOLD,
            heater: false,
        }
    }
}

/// Heater policy the coordinator pushes to every peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    pub temp_threshold: f32,
    /// When set, peers drive the heater to `heater` regardless of temperature.
    pub heater_override: bool,
    pub heater: bool,
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self {
            temp_threshold: DEFAULT_TEMP_THRESHOLD,
            heater_override: false,
            heater: false,
        }
    }
}

/// Partial telemetry; `None` marks a key absent from the payload.
///
/// Encodes only the present keys, which is how a peer announces its name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater: Option<bool>,
}

/// Decoded control command; `None` marks a key absent from the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandUpdate {
    pub temp_threshold: Option<f32>,
    pub heater_override: Option<bool>,
    pub heater: Option<bool>,
}

impl TelemetryReport {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode a complete report; absent keys keep their defaults.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut report = Self::default();
        TelemetryUpdate::decode(payload)?.apply_to(&mut report);
        Ok(report)
    }
}

impl ControlCommand {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut command = Self::default();
        CommandUpdate::decode(payload)?.apply_to(&mut command);
        Ok(command)
    }
}

impl TelemetryUpdate {
    /// Update carrying only the peer name.
    pub fn announcement(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        decode(payload)
    }

    /// Overwrite the fields present in this update.
    pub fn apply_to(&self, report: &mut TelemetryReport) {
        if let Some(name) = &self.name {
            report.name.clone_from(name);
        }
        if let Some(temperature) = self.temperature {
            report.temperature = temperature;
        }
        if let Some(humidity) = self.humidity {
            report.humidity = humidity;
        }
        if let Some(threshold) = self.temp_threshold {
            report.temp_threshold = threshold;
        }
        if let Some(heater) = self.heater {
            report.heater = heater;
        }
    }
}

impl CommandUpdate {
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        decode(payload)
    }

    pub fn apply_to(&self, command: &mut ControlCommand) {
        if let Some(threshold) = self.temp_threshold {
            command.temp_threshold = threshold;
        }
        if let Some(heater_override) = self.heater_override {
            command.heater_override = heater_override;
        }
        if let Some(heater) = self.heater {
            command.heater = heater;
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
}

fn decode<'de, T: Deserialize<'de>>(payload: &'de [u8]) -> Result<T, ProtocolError> {
    let object = payload.trim_ascii();
    if object.first() != Some(&b'{') || object.last() != Some(&b'}') {
        return Err(ProtocolError::MalformedMessage("payload is not a delimited object".to_string()));
    }
    serde_json::from_slice(object).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
}
