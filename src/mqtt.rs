use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::messages::{PresenceAnnouncement, ScanRequest};
use crate::notifier::{Notifier, NotifyError};

const DEFAULT_PUBLISHER_ID: &str = "presence-rs";
const DEFAULT_TOPIC_PATH: &str = "presence";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// Publishes presence to a broker and listens for scan requests.
///
/// The broker connection is driven by a background task that lives as long
/// as the client. Triggers fail while that task has no acknowledged
/// connection.
#[derive(Debug)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    broker: String,
    presence_topic: String,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttClient {
    pub fn new(config: &MqttConfig, scan_tx: mpsc::Sender<ScanRequest>) -> Self {
        let publisher_id = publisher_id(config);

        let port = config.port.unwrap_or(1883);
        let mut mqttoptions = MqttOptions::new(publisher_id.clone(), config.host.clone(), port);

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let event_loop = tokio::spawn(event_loop(
            client.clone(),
            eventloop,
            connected.clone(),
            scan_topic(config),
            scan_tx,
        ));

        MqttClient {
            client,
            broker: format!("{}:{}", config.host, port),
            presence_topic: presence_topic(config),
            connected,
            event_loop,
        }
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn event_loop(
    client: rumqttc::AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    connected: Arc<AtomicBool>,
    scan_topic: String,
    tx: mpsc::Sender<ScanRequest>,
) {
    loop {
        match eventloop.poll().await {
            Ok(notification) => match notification {
                rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                    dispatch(&p, &scan_topic, &tx);
                }
                rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                    debug!("Subscription acknowledged");
                }
                rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                    debug!("Connection acknowledged");
                    connected.store(true, Ordering::Release);
                    if let Err(err) = client.subscribe(scan_topic.clone(), QoS::AtMostOnce).await {
                        error!("Error subscribing to MQTT topic {}: {:?}", scan_topic, err);
                    }
                }
                rumqttc::Event::Incoming(rumqttc::Packet::Disconnect) => {
                    debug!("Broker disconnected");
                    connected.store(false, Ordering::Release);
                }
                _ => {}
            },
            Err(e) => {
                connected.store(false, Ordering::Release);
                warn!("Error polling MQTT event loop: {:?}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Returns whether the message requested a scan.
fn dispatch(publish: &rumqttc::Publish, scan_topic: &str, tx: &mpsc::Sender<ScanRequest>) -> bool {
    debug!(
        "Received MQTT message on topic {}: {:?}",
        publish.topic, publish.payload
    );
    if publish.topic != scan_topic {
        return false;
    }
    // a full channel already has a scan pending
    if tx.try_send(ScanRequest::Now).is_err() {
        debug!("Scan already requested");
    }
    true
}

#[async_trait]
impl Notifier for MqttClient {
    async fn trigger(&self, present: bool) -> Result<String, NotifyError> {
        let message = PresenceAnnouncement::new(present);
        info!(
            "Announcing {} on MQTT topic {}",
            message.presence, self.presence_topic
        );
        if !self.connected.load(Ordering::Acquire) {
            return Err(NotifyError::NotConnected(self.broker.clone()));
        }
        let payload = serde_json::to_string(&message)?;
        // a full request queue means the broker is not keeping up
        self.client
            .try_publish(self.presence_topic.clone(), QoS::AtLeastOnce, true, payload)?;
        Ok(self.presence_topic.clone())
    }

    async fn disconnect(&self) -> Result<(), NotifyError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await?;
        Ok(())
    }
}

fn publisher_id(config: &MqttConfig) -> String {
    config
        .publisher_id
        .clone()
        .unwrap_or_else(|| DEFAULT_PUBLISHER_ID.to_string())
}

fn topic_path(config: &MqttConfig) -> &str {
    config.topic_path.as_deref().unwrap_or(DEFAULT_TOPIC_PATH)
}

fn presence_topic(config: &MqttConfig) -> String {
    format!(
        "{}/{}/presence",
        topic_path(config),
        sanitize_name(&publisher_id(config))
    )
}

fn scan_topic(config: &MqttConfig) -> String {
    format!("{}/scan", topic_path(config))
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        let name = "Test's Device 123";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "test_s_device_123");
    }

    #[test]
    fn test_default_topics() {
        let config = MqttConfig {
            host: "localhost".to_string(),
            ..Default::default()
        };
        assert_eq!(presence_topic(&config), "presence/presence_rs/presence");
        assert_eq!(scan_topic(&config), "presence/scan");
    }

    #[test]
    fn test_custom_topics() {
        let config = MqttConfig {
            host: "localhost".to_string(),
            publisher_id: Some("Living Room".to_string()),
            topic_path: Some("home/monitor".to_string()),
            ..Default::default()
        };
        assert_eq!(presence_topic(&config), "home/monitor/living_room/presence");
        assert_eq!(scan_topic(&config), "home/monitor/scan");
    }

    fn unconnected(config: &MqttConfig) -> (MqttClient, rumqttc::EventLoop) {
        let options = MqttOptions::new(publisher_id(config), config.host.clone(), 1883);
        let (client, eventloop) = rumqttc::AsyncClient::new(options, REQUEST_CAPACITY);
        let client = MqttClient {
            client,
            broker: "localhost:1883".to_string(),
            presence_topic: presence_topic(config),
            connected: Arc::new(AtomicBool::new(false)),
            event_loop: tokio::spawn(async {}),
        };
        (client, eventloop)
    }

    #[tokio::test]
    async fn test_trigger_without_broker_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let config = MqttConfig {
            // nothing listens here
            host: "127.0.0.1".to_string(),
            port: Some(1),
            ..Default::default()
        };
        let client = MqttClient::new(&config, tx);
        for _ in 0..REQUEST_CAPACITY + 2 {
            let result = tokio::time::timeout(Duration::from_secs(1), client.trigger(true))
                .await
                .expect("trigger blocked");
            let err = result.unwrap_err();
            assert!(matches!(err, NotifyError::NotConnected(_)));
            assert_eq!(err.to_string(), "not connected to MQTT broker 127.0.0.1:1");
        }
    }

    #[tokio::test]
    async fn test_trigger_full_queue_fails_fast() {
        let config = MqttConfig {
            host: "localhost".to_string(),
            ..Default::default()
        };
        // the event loop is never polled, so requests stay queued
        let (client, _eventloop) = unconnected(&config);
        client.connected.store(true, Ordering::Release);

        for _ in 0..REQUEST_CAPACITY {
            assert_eq!(
                client.trigger(true).await.unwrap(),
                "presence/presence_rs/presence"
            );
        }
        let err = client.trigger(false).await.unwrap_err();
        assert!(matches!(err, NotifyError::Mqtt(_)));
    }

    #[test]
    fn test_dispatch_scan_request() {
        let (tx, mut rx) = mpsc::channel(1);

        let other = rumqttc::Publish::new("presence/other", QoS::AtMostOnce, "now");
        assert!(!dispatch(&other, "presence/scan", &tx));
        assert!(rx.try_recv().is_err());

        let scan = rumqttc::Publish::new("presence/scan", QoS::AtMostOnce, "");
        assert!(dispatch(&scan, "presence/scan", &tx));
        // already pending, the second request is folded into the first
        assert!(dispatch(&scan, "presence/scan", &tx));
        assert_eq!(rx.try_recv().unwrap(), ScanRequest::Now);
        assert!(rx.try_recv().is_err());
    }
}
