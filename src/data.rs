//! # Data Model
//!
//! Records produced by one gateway cycle. Everything here is immutable once
//! built: later stages wrap or persist a record, they never edit it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds since the Unix epoch with sub-second precision
pub fn unix_timestamp(at: DateTime<Local>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// One decoded sensor channel reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    pub hwid: String,
    pub value: f64,
    /// Unix seconds
    pub timestamp: f64,
}

/// One aggregated reading set from a single acquisition window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialOutput {
    id: Uuid,
    datetime: DateTime<Local>,
    content: BTreeMap<String, SensorValue>,
}

impl SerialOutput {
    /// Wrap decoded values under a fresh id
    pub fn new(datetime: DateTime<Local>, content: BTreeMap<String, SensorValue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            datetime,
            content,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn datetime(&self) -> DateTime<Local> {
        self.datetime
    }

    /// Readings keyed by hwid
    pub fn content(&self) -> &BTreeMap<String, SensorValue> {
        &self.content
    }

    /// Value for one hwid, if present
    pub fn value(&self, hwid: &str) -> Option<f64> {
        self.content.get(hwid).map(|v| v.value)
    }
}

/// Serialized payload handed to the messenger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub created_on: DateTime<Local>,
}

impl Message {
    pub fn new(content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            created_on: Local::now(),
        }
    }
}

/// Delivery outcome reported by a messenger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
    Error,
    Timeout,
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseStatus::Success => "SUCCESS",
            ResponseStatus::Failed => "FAILED",
            ResponseStatus::Error => "ERROR",
            ResponseStatus::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Result of one publish attempt
///
/// Only constructible from the [`Message`] it answers, so the back-reference
/// is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    id: Uuid,
    status: ResponseStatus,
    message_id: Uuid,
    content: String,
    received_on: DateTime<Local>,
}

impl Response {
    pub fn new(message: &Message, status: ResponseStatus, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            message_id: message.id,
            content: content.into(),
            received_on: Local::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn received_on(&self) -> DateTime<Local> {
        self.received_on
    }
}

/// Output of the secondary recording device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub path: PathBuf,
    pub datetime: DateTime<Local>,
    pub duration: u32,
    pub samplerate: u32,
    pub channels: u16,
}

/// Persisted metadata of a secondary recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelRecording {
    pub id: Uuid,
    pub datetime: DateTime<Local>,
    pub hwid: String,
    pub path: PathBuf,
}

impl AccelRecording {
    pub fn from_recording(recording: &Recording, hwid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            datetime: recording.datetime,
            hwid: hwid.into(),
            path: recording.path.clone(),
        }
    }
}
