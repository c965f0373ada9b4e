use async_trait::async_trait;
use log::{debug, info};
use reqwest::{StatusCode, Url};
use serde_derive::Serialize;

use crate::config::{Event, IftttConfig};
use crate::notifier::{Notifier, NotifyError};

/// IFTTT Maker webhooks client.
#[derive(Debug, Clone)]
pub struct IftttClient {
    client: reqwest::Client,
    present: Trigger,
    absent: Trigger,
}

#[derive(Debug, Clone)]
struct Trigger {
    event: String,
    url: Url,
    values: Values,
}

#[derive(Debug, Clone, Serialize)]
struct Values {
    #[serde(skip_serializing_if = "String::is_empty")]
    value1: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value2: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value3: String,
}

impl IftttClient {
    pub fn new(config: &IftttConfig) -> Result<Self, NotifyError> {
        Ok(IftttClient {
            client: reqwest::Client::builder().timeout(config.timeout).build()?,
            present: Trigger::new(&config.base_url, &config.key, &config.present)?,
            absent: Trigger::new(&config.base_url, &config.key, &config.absent)?,
        })
    }
}

impl Trigger {
    fn new(base_url: &str, key: &str, event: &Event) -> Result<Self, NotifyError> {
        Ok(Trigger {
            event: event.event.clone(),
            url: trigger_url(base_url, &event.event, key)?,
            values: Values {
                value1: event.value1.clone(),
                value2: event.value2.clone(),
                value3: event.value3.clone(),
            },
        })
    }
}

/// `{base_url}/trigger/{event}/with/key/{key}`
fn trigger_url(base_url: &str, event: &str, key: &str) -> Result<Url, NotifyError> {
    let invalid = |reason: String| NotifyError::Url {
        url: base_url.to_string(),
        reason,
    };
    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["trigger", event, "with", "key", key]);
    Ok(url)
}

#[async_trait]
impl Notifier for IftttClient {
    async fn trigger(&self, present: bool) -> Result<String, NotifyError> {
        let trigger = if present { &self.present } else { &self.absent };

        // the URL carries the key, so only the event is logged
        debug!("Triggering IFTTT event {} with {:?}", trigger.event, trigger.values);
        let resp = self
            .client
            .post(trigger.url.clone())
            .json(&trigger.values)
            .send()
            .await?;

        let status = resp.status();
        debug!("IFTTT event {} response: {}", trigger.event, status);
        if status != StatusCode::OK {
            let body = match resp.text().await {
                Ok(body) if body.is_empty() => "<empty body>".to_string(),
                Ok(body) => body,
                Err(err) => format!("<failed to read body: {}>", err),
            };
            return Err(NotifyError::Status {
                status: status.to_string(),
                body,
            });
        }

        info!("Triggered IFTTT event {}", trigger.event);
        Ok(trigger.event.clone())
    }
}
