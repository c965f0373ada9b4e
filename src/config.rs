use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::time::Duration;

use log::info;
use mac_address::MacAddress;
use network_interface::{NetworkInterface, NetworkInterfaceConfig as _};
use serde_derive::Deserialize;
use thiserror::Error;

const DEFAULT_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_PING_COUNT: u32 = 1;
const DEFAULT_IFTTT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_IFTTT_BASE_URL: &str = "https://maker.ifttt.com";
pub const DEFAULT_PRESENT_EVENT: &str = "presence_detected";
pub const DEFAULT_ABSENT_EVENT: &str = "absence_detected";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("listing network interfaces: {0}")]
    Interfaces(String),
    #[error("interface {0}: no such network interface")]
    UnknownInterface(String),
    #[error("no MAC addresses")]
    NoAddresses,
    #[error("address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("duplicate MAC address ({0})")]
    DuplicateAddress(MacAddress),
    #[error("no notifier configured (expected [ifttt] or [mqtt])")]
    NoNotifier,
    #[error("only one of [ifttt] or [mqtt] may be configured")]
    MultipleNotifiers,
    #[error("IFTTT base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("no IFTTT key")]
    NoKey,
    #[error("invalid IFTTT {kind} event name: {name:?}")]
    InvalidEvent { kind: &'static str, name: String },
    #[error("no MQTT host")]
    NoHost,
}

/// Configuration file as written on disk.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub interval_seconds: Option<u64>,
    pub retrigger_after_seconds: Option<u64>,
    pub interfaces: Option<Vec<String>>,
    pub mac_addresses: Option<Vec<String>>,
    pub ping_count: Option<u32>,
    pub sudo: Option<bool>,
    pub ifttt: Option<IftttSection>,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct IftttSection {
    pub base_url: Option<String>,
    pub key: Option<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub events: EventsSection,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EventsSection {
    #[serde(default)]
    pub present: Event,
    #[serde(default)]
    pub absent: Event,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Event {
    pub event: String,
    pub value1: String,
    pub value2: String,
    pub value3: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IftttConfig {
    pub base_url: String,
    pub key: String,
    pub timeout: Duration,
    pub present: Event,
    pub absent: Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    Ifttt(IftttConfig),
    Mqtt(MqttConfig),
}

/// Validated configuration. Always a full replacement of the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interval: Duration,
    /// Zero disables periodic re-announcement.
    pub retrigger_after: Duration,
    /// Empty means every interface.
    pub interfaces: Vec<String>,
    pub mac_addresses: Vec<MacAddress>,
    pub ping_count: u32,
    pub sudo: bool,
    pub notifier: NotifierConfig,
}

/// Source of the host's network interface names.
pub trait InterfaceLister {
    fn interface_names(&self) -> Result<Vec<String>, ConfigError>;
}

pub struct SystemInterfaces;

impl InterfaceLister for SystemInterfaces {
    fn interface_names(&self) -> Result<Vec<String>, ConfigError> {
        let interfaces =
            NetworkInterface::show().map_err(|e| ConfigError::Interfaces(e.to_string()))?;
        // one entry per address, so names repeat
        let mut names: Vec<String> = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            if !names.contains(&interface.name) {
                names.push(interface.name);
            }
        }
        Ok(names)
    }
}

pub fn load_config(path: &Path, interfaces: &impl InterfaceLister) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents, interfaces)
}

pub fn parse_config(contents: &str, interfaces: &impl InterfaceLister) -> Result<Config, ConfigError> {
    let config: AppConfig = toml::de::from_str(contents)?;
    config.validate(interfaces)
}

impl AppConfig {
    pub fn validate(self, lister: &impl InterfaceLister) -> Result<Config, ConfigError> {
        let interval = match self.interval_seconds.unwrap_or(0) {
            0 => Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            seconds => Duration::from_secs(seconds),
        };
        let retrigger_after = Duration::from_secs(self.retrigger_after_seconds.unwrap_or(0));

        let configured = self.interfaces.unwrap_or_default();
        let available = lister.interface_names()?;
        let interfaces = if configured.is_empty() {
            available
        } else {
            if let Some(missing) = configured.iter().find(|i| !available.contains(i)) {
                return Err(ConfigError::UnknownInterface(missing.clone()));
            }
            configured
        };

        let raw_addresses = self.mac_addresses.unwrap_or_default();
        if raw_addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        let mut seen = HashSet::with_capacity(raw_addresses.len());
        let mut mac_addresses = Vec::with_capacity(raw_addresses.len());
        for raw in raw_addresses {
            let address =
                MacAddress::from_str(&raw).map_err(|e| ConfigError::InvalidAddress {
                    address: raw.clone(),
                    reason: e.to_string(),
                })?;
            if !seen.insert(address) {
                return Err(ConfigError::DuplicateAddress(address));
            }
            mac_addresses.push(address);
        }

        let ping_count = match self.ping_count.unwrap_or(0) {
            0 => DEFAULT_PING_COUNT,
            count => count,
        };

        let notifier = match (self.ifttt, self.mqtt) {
            (Some(ifttt), None) => NotifierConfig::Ifttt(ifttt.validate()?),
            (None, Some(mqtt)) => {
                if mqtt.host.is_empty() {
                    return Err(ConfigError::NoHost);
                }
                NotifierConfig::Mqtt(mqtt)
            }
            (None, None) => return Err(ConfigError::NoNotifier),
            (Some(_), Some(_)) => return Err(ConfigError::MultipleNotifiers),
        };

        Ok(Config {
            interval,
            retrigger_after,
            interfaces,
            mac_addresses,
            ping_count,
            sudo: self.sudo.unwrap_or(true),
            notifier,
        })
    }
}

impl IftttSection {
    fn validate(self) -> Result<IftttConfig, ConfigError> {
        let base_url = self
            .base_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_IFTTT_BASE_URL.to_string());
        match reqwest::Url::parse(&base_url) {
            Ok(url) if url.cannot_be_a_base() => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: base_url,
                    reason: "cannot be a base URL".to_string(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: base_url,
                    reason: e.to_string(),
                });
            }
        }

        let key = self.key.unwrap_or_default();
        if key.is_empty() {
            return Err(ConfigError::NoKey);
        }

        let present = validate_event("present", self.events.present, DEFAULT_PRESENT_EVENT)?;
        let absent = validate_event("absent", self.events.absent, DEFAULT_ABSENT_EVENT)?;

        Ok(IftttConfig {
            base_url,
            key,
            timeout: Duration::from_secs(
                self.timeout_seconds
                    .filter(|&s| s > 0)
                    .unwrap_or(DEFAULT_IFTTT_TIMEOUT_SECONDS),
            ),
            present,
            absent,
        })
    }
}

fn validate_event(kind: &'static str, mut event: Event, default: &str) -> Result<Event, ConfigError> {
    if event.event.is_empty() {
        event.event = default.to_string();
    } else if !is_event_name(&event.event) {
        return Err(ConfigError::InvalidEvent {
            kind,
            name: event.event,
        });
    }
    Ok(event)
}

fn is_event_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

impl Config {
    pub fn log_values(&self) {
        info!("Interval: {:?}", self.interval);
        if self.retrigger_after.is_zero() {
            info!("Retrigger after: disabled");
        } else {
            info!("Retrigger after: {:?}", self.retrigger_after);
        }
        info!("Interfaces: {:?}", self.interfaces);
        let addresses: Vec<String> = self.mac_addresses.iter().map(|a| a.to_string()).collect();
        info!("MAC addresses: {:?}", addresses);
        info!("Ping count: {}", self.ping_count);
        info!("Sudo: {}", self.sudo);
        match &self.notifier {
            NotifierConfig::Ifttt(ifttt) => {
                info!("IFTTT base URL: {}", ifttt.base_url);
                info!("IFTTT key: {}", "*".repeat(ifttt.key.len()));
                info!("IFTTT timeout: {:?}", ifttt.timeout);
                for (kind, event) in [("present", &ifttt.present), ("absent", &ifttt.absent)] {
                    info!(
                        "IFTTT {} event: {} (value1: {:?}, value2: {:?}, value3: {:?})",
                        kind, event.event, event.value1, event.value2, event.value3
                    );
                }
            }
            NotifierConfig::Mqtt(mqtt) => {
                info!("MQTT host: {}:{}", mqtt.host, mqtt.port.unwrap_or(1883));
                if let Some(username) = &mqtt.username {
                    info!("MQTT username: {}", username);
                }
                if let Some(topic_path) = &mqtt.topic_path {
                    info!("MQTT topic path: {}", topic_path);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct StaticInterfaces(pub Vec<&'static str>);

#[cfg(test)]
impl InterfaceLister for StaticInterfaces {
    fn interface_names(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}
