use crate::config::PubSubConfig;
use crate::document::Document;
use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Fixed wait between broker reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

pub async fn publish_document(
    publisher: &dyn Publisher,
    topic: &str,
    document: &Document,
) -> Result<(), PublishError> {
    let payload = serde_json::to_vec(document)?;
    publisher.publish(topic, payload).await
}

#[async_trait]
trait ConnectionEvents: Send {
    async fn next_event(&mut self) -> Result<Event, ConnectionError>;
}

#[async_trait]
impl ConnectionEvents for EventLoop {
    async fn next_event(&mut self) -> Result<Event, ConnectionError> {
        self.poll().await
    }
}

/// Keeps the broker connection alive and mirrors its state into `connected`.
async fn drive_connection<E: ConnectionEvents>(mut events: E, connected: Arc<AtomicBool>, host: String) {
    loop {
        match events.next_event().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                tracing::info!(host=%host, "connected to mqtt broker");
                connected.store(true, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::Relaxed);
                tracing::warn!(error=%err, host=%host, "mqtt connection lost; reconnecting");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Retained, at-most-once MQTT publisher. Messages offered while the broker
/// is unreachable are refused rather than queued.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn connect(config: &PubSubConfig) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keepalive());
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        let connected = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(drive_connection(eventloop, connected.clone(), config.host.clone()));

        (Self { client, connected }, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, true, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{doc, RecordingPublisher};
    use rumqttc::{ConnAck, ConnectReturnCode};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedEvents {
        script: VecDeque<Result<Event, ConnectionError>>,
        polls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionEvents for ScriptedEvents {
        async fn next_event(&mut self) -> Result<Event, ConnectionError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn publishes_documents_as_json() {
        let publisher = RecordingPublisher::new();
        let document = doc(json!({"vin": "V1", "timestamp": 5, "battery_level": 80}));
        publish_document(&publisher, "tesla/charge_state", &document)
            .await
            .unwrap();

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "tesla/charge_state");
        assert_eq!(messages[0].payload, document.into_value());
    }

    #[tokio::test]
    async fn refuses_messages_until_the_broker_acknowledges() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = PubSubConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..PubSubConfig::default()
        };
        let (publisher, handle) = MqttPublisher::connect(&config);
        let result = publisher.publish("tesla/vehicle", b"{}".to_vec()).await;
        assert!(matches!(result, Err(PublishError::Disconnected)));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_a_fixed_delay() {
        let polls = Arc::new(AtomicUsize::new(0));
        let connected = Arc::new(AtomicBool::new(true));
        let events = ScriptedEvents {
            script: VecDeque::from(vec![
                Err(ConnectionError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))),
                Ok(Event::Incoming(Incoming::ConnAck(ConnAck::new(
                    ConnectReturnCode::Success,
                    false,
                )))),
            ]),
            polls: polls.clone(),
        };
        let task = tokio::spawn(drive_connection(events, connected.clone(), "broker".to_string()));

        sleep(Duration::from_millis(10)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert!(!connected.load(Ordering::SeqCst));

        sleep(RECONNECT_DELAY - Duration::from_secs(1)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(connected.load(Ordering::SeqCst));
        task.abort();
    }
}
