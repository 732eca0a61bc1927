//! # Heartbeat
//!
//! Periodic liveness message so the backend can tell a silent gateway from a
//! quiet hive. Publishes the local time on an aligned interval.

use std::time::Duration;

use chrono::{Local, Utc};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::data::Message;
use crate::messenger::Messenger;
use crate::schedule::Trigger;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(360);

/// Heartbeat payload: local time as `YYYY-mm-ddTHH:MM:SS`
pub fn heartbeat_payload() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Publish one heartbeat
///
/// # Returns
///
/// * `bool` - `true` if the broker acknowledged it
pub async fn beat(messenger: &dyn Messenger) -> bool {
    let message = Message::new(heartbeat_payload());
    let response = messenger.send(&message).await;

    if response.status().is_success() {
        debug!("Heartbeat {} sent", message.content);
        true
    } else {
        warn!("Heartbeat not delivered: {} {}", response.status(), response.content());
        false
    }
}

/// Publish heartbeats forever on `interval` boundaries
pub async fn run(messenger: Box<dyn Messenger>, interval: Duration) {
    let mut trigger = Trigger::every(interval, Utc::now());
    // First beat on the next boundary, not at startup
    trigger.fire(Utc::now());

    loop {
        sleep(trigger.until_next(Utc::now())).await;
        trigger.fire(Utc::now());
        beat(messenger.as_ref()).await;
    }
}
