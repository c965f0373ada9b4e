//! Programmable stand-ins for the detector's collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mac_address::MacAddress;

use crate::config::{Config, MqttConfig, NotifierConfig};
use crate::neighbors::{NeighborProber, ProbeError};
use crate::notifier::{Notifier, NotifyError};

pub fn mac(n: u8) -> MacAddress {
    MacAddress::new([0, 0, 0, 0, 0, n])
}

pub fn test_config(addresses: &[MacAddress], retrigger_after: Duration) -> Config {
    Config {
        interval: Duration::from_secs(30),
        retrigger_after,
        interfaces: vec!["eth0".to_string()],
        mac_addresses: addresses.to_vec(),
        ping_count: 1,
        sudo: false,
        notifier: NotifierConfig::Mqtt(MqttConfig {
            host: "localhost".to_string(),
            ..Default::default()
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCall {
    pub interfaces: HashSet<String>,
    pub addresses: HashSet<MacAddress>,
    pub count: u32,
}

/// Answers probes from a queue: the listed addresses are reported live,
/// everything else is left out of the result.
#[derive(Clone, Default)]
pub struct FakeProber {
    responses: Arc<Mutex<VecDeque<Result<Vec<MacAddress>, String>>>>,
    calls: Arc<Mutex<Vec<ProbeCall>>>,
}

impl FakeProber {
    pub fn live(&self, addresses: &[MacAddress]) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(addresses.to_vec()));
        self
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_more(&self) -> bool {
        !self.responses.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl NeighborProber for FakeProber {
    async fn probe(
        &self,
        interfaces: &HashSet<String>,
        addresses: &HashSet<MacAddress>,
        count: u32,
    ) -> Result<HashMap<MacAddress, bool>, ProbeError> {
        self.calls.lock().unwrap().push(ProbeCall {
            interfaces: interfaces.clone(),
            addresses: addresses.clone(),
            count,
        });
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected probe");
        match response {
            Ok(live) => Ok(live
                .into_iter()
                .filter(|a| addresses.contains(a))
                .map(|a| (a, true))
                .collect()),
            Err(stderr) => Err(ProbeError::Failed {
                command: "ip neighbor show".to_string(),
                status: "exit status: 1".to_string(),
                stderr,
            }),
        }
    }
}

/// Records every trigger and answers from a queue.
#[derive(Clone, Default)]
pub struct FakeNotifier {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<Mutex<Vec<bool>>>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeNotifier {
    pub fn accept(&self, event: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(event.to_string()));
        self
    }

    pub fn reject(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_more(&self) -> bool {
        !self.responses.lock().unwrap().is_empty()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn trigger(&self, present: bool) -> Result<String, NotifyError> {
        self.calls.lock().unwrap().push(present);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected trigger");
        response.map_err(|body| NotifyError::Status {
            status: "500 Internal Server Error".to_string(),
            body,
        })
    }

    async fn disconnect(&self) -> Result<(), NotifyError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Never answers.
pub struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn trigger(&self, _present: bool) -> Result<String, NotifyError> {
        std::future::pending().await
    }
}
