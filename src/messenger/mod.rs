//! # Messenger Module
//!
//! Publishes cycle results to the remote broker. A send never fails from the
//! caller's point of view; the delivery outcome is carried by the returned
//! [`Response`].

pub mod mqtt;

use async_trait::async_trait;

use crate::data::{Message, Response, SerialOutput};
use crate::error::Result;

pub use mqtt::{MqttMessenger, MqttSettings};

/// Delivery of one message with an internal deadline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Publish `message` and report how it went
    async fn send(&self, message: &Message) -> Response;
}

/// Wrap a serial output into a publishable message
///
/// # Errors
///
/// Returns error if the output cannot be serialized to JSON
pub fn build_message(output: &SerialOutput) -> Result<Message> {
    let content = serde_json::to_string(output)?;
    Ok(Message::new(content))
}
