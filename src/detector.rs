use std::collections::{HashMap, HashSet};

use log::{info, warn};
use mac_address::MacAddress;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::Config;
use crate::neighbors::{NeighborProber, ProbeError};
use crate::notifier::{Notifier, NotifyError};
use crate::state::PresenceState;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// What a detection cycle sent, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// The aggregate changed and the notifier accepted the event.
    Changed(String),
    /// Still present after the retrigger window; announced again.
    Retriggered(String),
}

/// Turns neighbor probes into a debounced presence signal and notifies on
/// changes.
///
/// Not synchronized: `detect`, `set_config` and `set_client` must be called
/// serially.
pub struct Detector {
    config: Config,
    interfaces: HashSet<String>,
    states: HashMap<MacAddress, PresenceState>,
    state: PresenceState,
    last_change: Option<Instant>,
    prober: Box<dyn NeighborProber>,
    client: Box<dyn Notifier>,
}

impl Detector {
    pub fn new(config: Config, prober: Box<dyn NeighborProber>, client: Box<dyn Notifier>) -> Self {
        let mut detector = Detector {
            interfaces: HashSet::with_capacity(config.interfaces.len()),
            states: HashMap::with_capacity(config.mac_addresses.len()),
            config,
            state: PresenceState::new(),
            last_change: None,
            prober,
            client,
        };
        detector.reconcile();
        detector
    }

    pub fn present(&self) -> bool {
        self.state.present()
    }

    pub fn aggregate(&self) -> &PresenceState {
        &self.state
    }

    pub fn state(&self, address: &MacAddress) -> Option<&PresenceState> {
        self.states.get(address)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &dyn Notifier {
        self.client.as_ref()
    }

    pub async fn detect(&mut self) -> Result<Outcome, DetectError> {
        info!("Detecting presence (present: {})", self.state.present());

        let addresses: HashSet<MacAddress> = self.states.keys().copied().collect();
        let confirmed = self
            .prober
            .probe(&self.interfaces, &addresses, self.config.ping_count)
            .await?;

        for (address, state) in self.states.iter_mut() {
            state.set(confirmed.get(address).copied().unwrap_or(false));
        }
        for address in &self.config.mac_addresses {
            if let Some(state) = self.states.get(address) {
                info!(
                    "{} (present: {}, changed: {})",
                    address,
                    state.present(),
                    state.changed()
                );
            }
        }

        let present = self.states.values().any(PresenceState::present);
        self.state.set(present);
        info!(
            "Detected presence (present: {}, changed: {})",
            self.state.present(),
            self.state.changed()
        );

        if self.state.changed() {
            let event = self.notify().await?;
            return Ok(Outcome::Changed(event));
        }
        if self.retrigger_due() {
            info!("Still present after {:?}, retriggering", self.config.retrigger_after);
            let event = self.notify().await?;
            return Ok(Outcome::Retriggered(event));
        }
        Ok(Outcome::Unchanged)
    }

    fn retrigger_due(&self) -> bool {
        !self.config.retrigger_after.is_zero()
            && self.state.present()
            && self
                .last_change
                .is_none_or(|last| last.elapsed() >= self.config.retrigger_after)
    }

    async fn notify(&mut self) -> Result<String, NotifyError> {
        let present = self.state.present();
        let pending = PendingNotification::new(&mut self.state);
        match self.client.trigger(present).await {
            Ok(event) => {
                pending.delivered();
                self.last_change = Some(Instant::now());
                info!("Notified presence {} (event: {})", present, event);
                Ok(event)
            }
            Err(err) => {
                warn!("Error notifying presence {}: {}", present, err);
                Err(err)
            }
        }
    }

    /// Replaces the configuration. Addresses kept by the new configuration
    /// keep their state; new ones start fresh and dropped ones are forgotten.
    /// The aggregate is only recomputed by the next `detect`.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.reconcile();
    }

    /// Swaps the notifier used from the next cycle on, returning the old one.
    pub fn set_client(&mut self, client: Box<dyn Notifier>) -> Box<dyn Notifier> {
        std::mem::replace(&mut self.client, client)
    }

    fn reconcile(&mut self) {
        self.interfaces = self.config.interfaces.iter().cloned().collect();

        let mut stale: HashSet<MacAddress> = self.states.keys().copied().collect();
        for address in &self.config.mac_addresses {
            if !stale.remove(address) {
                self.states.entry(*address).or_default();
            }
        }
        for address in stale {
            self.states.remove(&address);
        }
    }
}

/// Resets the aggregate when dropped before [`delivered`](Self::delivered),
/// so a failed or cancelled notification is retried by the next cycle.
struct PendingNotification<'a> {
    state: Option<&'a mut PresenceState>,
}

impl<'a> PendingNotification<'a> {
    fn new(state: &'a mut PresenceState) -> Self {
        PendingNotification { state: Some(state) }
    }

    fn delivered(mut self) {
        self.state = None;
    }
}

impl Drop for PendingNotification<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.reset();
        }
    }
}
