//! # Periodic Report Builder
//!
//! Maps an ordered field schema onto a report payload. The field order is a
//! contract with the firmware; the schema carries the firmware protocol
//! version so a mismatched deployment fails at startup rather than silently
//! assigning values to the wrong channel.

use std::collections::{BTreeMap, HashSet};

use chrono::Local;
use serde::Deserialize;

use super::fields::FieldKind;
use crate::data::{unix_timestamp, SensorValue, SerialOutput};
use crate::error::{DecodeError, WaspiError};
use crate::transfer::protocol::MAX_PACKET_SIZE;

/// Legacy firmware: 2-byte integer fields
pub const PROTOCOL_V1: u8 = 1;

/// Current firmware: 4-byte fields
pub const PROTOCOL_V2: u8 = 2;

/// One field of the periodic report
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub hwid: String,

    #[serde(default)]
    pub kind: FieldKind,

    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl FieldSpec {
    /// A plain `f32` field
    pub fn f32(hwid: impl Into<String>) -> Self {
        Self {
            hwid: hwid.into(),
            kind: FieldKind::F32,
            scale: 1.0,
        }
    }
}

/// Ordered description of the periodic report payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportSchema {
    pub protocol_version: u8,
    pub fields: Vec<FieldSpec>,
}

impl ReportSchema {
    /// Current-firmware schema with one `f32` per hwid
    pub fn from_hwids<S: AsRef<str>>(hwids: &[S]) -> Self {
        Self {
            protocol_version: PROTOCOL_V2,
            fields: hwids.iter().map(|h| FieldSpec::f32(h.as_ref())).collect(),
        }
    }

    /// Payload size the firmware must send
    pub fn payload_width(&self) -> usize {
        self.fields.iter().map(|f| f.kind.width()).sum()
    }

    /// Hardware ids in decode order
    pub fn hwids(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.hwid.as_str())
    }

    /// Check the schema against the firmware protocol rules
    ///
    /// # Errors
    ///
    /// Returns `WaspiError::Config` if the schema is empty, has blank or
    /// duplicate hwids, does not fit in one packet, or uses a field width
    /// the declared protocol version does not send.
    pub fn validate(&self) -> Result<(), WaspiError> {
        if self.fields.is_empty() {
            return Err(WaspiError::Config(
                "Report schema must declare at least one field".to_string(),
            ));
        }

        let allowed_width = match self.protocol_version {
            PROTOCOL_V1 => 2,
            PROTOCOL_V2 => 4,
            other => {
                return Err(WaspiError::Config(format!(
                    "Unsupported firmware protocol version {} (expected {} or {})",
                    other, PROTOCOL_V1, PROTOCOL_V2
                )))
            }
        };

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.hwid.trim().is_empty() {
                return Err(WaspiError::Config("Field hwid must not be empty".to_string()));
            }
            if !seen.insert(field.hwid.as_str()) {
                return Err(WaspiError::Config(format!("Duplicate hwid: {}", field.hwid)));
            }
            if field.kind.width() != allowed_width {
                return Err(WaspiError::Config(format!(
                    "Field {} is {:?} ({} bytes), protocol version {} sends {}-byte fields",
                    field.hwid,
                    field.kind,
                    field.kind.width(),
                    self.protocol_version,
                    allowed_width
                )));
            }
            if !field.scale.is_finite() {
                return Err(WaspiError::Config(format!(
                    "Field {} has a non-finite scale",
                    field.hwid
                )));
            }
        }

        if self.payload_width() > MAX_PACKET_SIZE {
            return Err(WaspiError::Config(format!(
                "Report needs {} bytes, a packet carries at most {}",
                self.payload_width(),
                MAX_PACKET_SIZE
            )));
        }

        Ok(())
    }

    /// Decode one report payload into a [`SerialOutput`]
    ///
    /// # Arguments
    ///
    /// * `payload` - Unstuffed payload of a periodic report packet
    ///
    /// # Returns
    ///
    /// * `Result<SerialOutput, DecodeError>` - One value per schema field, rounded to 3 decimals
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::OutOfBounds` if the payload is shorter than the
    /// schema, `DecodeError::TrailingBytes` if it is longer.
    ///
    /// # Examples
    ///
    /// ```
    /// use waspi::sensor::report::ReportSchema;
    ///
    /// let schema = ReportSchema::from_hwids(&["temp_0", "hum_0"]);
    /// let mut payload = 21.5f32.to_le_bytes().to_vec();
    /// payload.extend_from_slice(&55.0f32.to_le_bytes());
    ///
    /// let output = schema.build(&payload).unwrap();
    /// assert_eq!(output.value("temp_0"), Some(21.5));
    /// assert_eq!(output.value("hum_0"), Some(55.0));
    /// ```
    pub fn build(&self, payload: &[u8]) -> Result<SerialOutput, DecodeError> {
        let now = Local::now();
        let timestamp = unix_timestamp(now);

        let mut offset = 0;
        let mut content = BTreeMap::new();

        for field in &self.fields {
            let (next, raw) = field.kind.decode(payload, offset)?;
            offset = next;

            let value = round3(raw * field.scale);
            content.insert(
                field.hwid.clone(),
                SensorValue {
                    hwid: field.hwid.clone(),
                    value,
                    timestamp,
                },
            );
        }

        if offset != payload.len() {
            return Err(DecodeError::TrailingBytes {
                expected: offset,
                len: payload.len(),
            });
        }

        Ok(SerialOutput::new(now, content))
    }
}

/// Round to the sensor precision contract (3 decimals)
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
