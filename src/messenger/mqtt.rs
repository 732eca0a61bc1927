//! MQTT messenger built on `rumqttc`.
//!
//! Each send opens its own short-lived connection: connect, publish, wait for
//! the acknowledgement matching the QoS, disconnect.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Messenger;
use crate::data::{Message, Response, ResponseStatus};

/// Grace period for the DISCONNECT packet to leave
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Request channel capacity of the per-send client
const REQUEST_CAPACITY: usize = 10;

/// Broker connection parameters
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub qos: QoS,
    pub keep_alive: Duration,
    pub timeout: Duration,
}

/// Why a publish did not complete
#[derive(Debug)]
enum PublishFailure {
    Client(ClientError),
    Connection(ConnectionError),
}

/// Publish-per-send MQTT client
#[derive(Debug, Clone)]
pub struct MqttMessenger {
    settings: MqttSettings,
}

impl MqttMessenger {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Same broker, different topic
    pub fn with_topic(&self, topic: impl Into<String>) -> Self {
        let mut settings = self.settings.clone();
        settings.topic = topic.into();
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        // Brokers drop an older session that reuses a client id
        let client_id = format!("{}-{}", self.settings.client_id, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.settings.host.clone(), self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);

        if let Some(username) = &self.settings.username {
            let password = self.settings.password.clone().unwrap_or_default();
            options.set_credentials(username.clone(), password);
        }

        options
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), PublishFailure> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        client
            .publish(self.settings.topic.as_str(), self.settings.qos, false, payload)
            .await
            .map_err(PublishFailure::Client)?;

        let result = wait_for_ack(&mut eventloop, self.settings.qos).await;

        if result.is_ok() && client.disconnect().await.is_ok() {
            let _ = timeout(DISCONNECT_GRACE, drain_until_disconnect(&mut eventloop)).await;
        }

        result
    }
}

/// Poll the event loop until the broker confirms delivery at `qos`
async fn wait_for_ack(eventloop: &mut EventLoop, qos: QoS) -> Result<(), PublishFailure> {
    loop {
        let event = eventloop.poll().await.map_err(PublishFailure::Connection)?;

        match (qos, event) {
            (QoS::AtMostOnce, Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
            (QoS::AtLeastOnce, Event::Incoming(Packet::PubAck(_))) => return Ok(()),
            (QoS::ExactlyOnce, Event::Incoming(Packet::PubComp(_))) => return Ok(()),
            (_, Event::Incoming(Packet::ConnAck(ack))) => debug!("Broker accepted connection: {:?}", ack.code),
            _ => {}
        }
    }
}

async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    while let Ok(event) = eventloop.poll().await {
        if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
            break;
        }
    }
}

#[async_trait]
impl Messenger for MqttMessenger {
    async fn send(&self, message: &Message) -> Response {
        let payload = message.content.clone().into_bytes();

        match timeout(self.settings.timeout, self.publish(payload)).await {
            Ok(Ok(())) => {
                info!("Published message {} to {}", message.id, self.settings.topic);
                Response::new(message, ResponseStatus::Success, "published")
            }
            Ok(Err(PublishFailure::Connection(e))) => {
                warn!("Broker connection failed for message {}: {}", message.id, e);
                Response::new(message, ResponseStatus::Failed, e.to_string())
            }
            Ok(Err(PublishFailure::Client(e))) => {
                warn!("Publish request for message {} rejected: {}", message.id, e);
                Response::new(message, ResponseStatus::Error, e.to_string())
            }
            Err(_) => {
                warn!(
                    "No acknowledgement for message {} within {:?}",
                    message.id, self.settings.timeout
                );
                Response::new(
                    message,
                    ResponseStatus::Timeout,
                    format!("no acknowledgement within {:?}", self.settings.timeout),
                )
            }
        }
    }
}

/// Map a configured QoS level to `rumqttc`
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "waspi-test".to_string(),
            username: None,
            password: None,
            topic: "waspi/test".to_string(),
            qos: QoS::AtLeastOnce,
            keep_alive: Duration::from_secs(30),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }

    #[test]
    fn test_with_topic_keeps_broker() {
        let messenger = MqttMessenger::new(settings(1883));
        let heartbeat = messenger.with_topic("waspi/heartbeat");
        assert_eq!(heartbeat.settings().topic, "waspi/heartbeat");
        assert_eq!(heartbeat.settings().port, 1883);
        assert_eq!(messenger.settings().topic, "waspi/test");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_not_success() {
        // Nothing listens on a port we just released
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let messenger = MqttMessenger::new(settings(port));
        let message = Message::new("{}".to_string());
        let response = messenger.send(&message).await;

        assert_eq!(response.message_id(), message.id);
        assert_ne!(response.status(), ResponseStatus::Success);
    }
}
