use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::NotifierConfig;
use crate::ifttt::IftttClient;
use crate::messages::ScanRequest;
use crate::mqtt::MqttClient;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{status}: {body}")]
    Status { status: String, body: String },
    #[error(transparent)]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("not connected to MQTT broker {0}")]
    NotConnected(String),
    #[error("encoding payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("webhook URL {url}: {reason}")]
    Url { url: String, reason: String },
}

/// Delivers the aggregate presence to the outside world.
///
/// Calls may be repeated for the same value after a failure, so
/// implementations must tolerate duplicates.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns an identifier for what was sent.
    async fn trigger(&self, present: bool) -> Result<String, NotifyError>;

    async fn disconnect(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

pub fn build_notifier(
    config: &NotifierConfig,
    scan_tx: mpsc::Sender<ScanRequest>,
) -> Result<Box<dyn Notifier>, NotifyError> {
    match config {
        NotifierConfig::Ifttt(ifttt) => Ok(Box::new(IftttClient::new(ifttt)?)),
        NotifierConfig::Mqtt(mqtt) => Ok(Box::new(MqttClient::new(mqtt, scan_tx))),
    }
}
