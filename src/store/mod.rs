//! # Store Module
//!
//! Durable local copy of everything a cycle produces. Store calls are
//! fire-and-forget for the orchestrator: implementations log their own
//! failures instead of returning them.

pub mod jsonl;

use crate::data::{AccelRecording, Message, Response, SerialOutput};

pub use jsonl::JsonlStore;

/// Append-only record sink keyed by record id
#[cfg_attr(test, mockall::automock)]
pub trait Store: Send + Sync {
    fn store_sensor_value(&self, output: &SerialOutput);

    fn store_accel_recording(&self, recording: &AccelRecording);

    fn store_message(&self, message: &Message);

    fn store_response(&self, response: &Response);
}
