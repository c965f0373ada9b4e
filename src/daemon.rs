use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use log::{debug, error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::{InterfaceLister, load_config};
use crate::detector::{Detector, Outcome};
use crate::messages::ScanRequest;
use crate::notifier::build_notifier;

/// Serializes every call into the detector: interval ticks, scan requests,
/// SIGUSR1 reloads and SIGINT/SIGTERM shutdown are handled one at a time.
pub struct Daemon<L> {
    detector: Detector,
    config_path: PathBuf,
    interfaces: L,
    scan_tx: mpsc::Sender<ScanRequest>,
    scan_rx: mpsc::Receiver<ScanRequest>,
}

impl<L: InterfaceLister> Daemon<L> {
    pub fn new(
        detector: Detector,
        config_path: PathBuf,
        interfaces: L,
        scan_tx: mpsc::Sender<ScanRequest>,
        scan_rx: mpsc::Receiver<ScanRequest>,
    ) -> Self {
        Daemon {
            detector,
            config_path,
            interfaces,
            scan_tx,
            scan_rx,
        }
    }

    pub async fn run_loop(mut self) -> anyhow::Result<()> {
        let mut reload = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
        let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

        let mut ticker = ticker(self.detector.config().interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                Some(_request) = self.scan_rx.recv() => {
                    info!("Received scan request");
                    self.cycle().await;
                }
                _ = reload.recv() => {
                    self.handle_reload(&mut ticker).await;
                }
                _ = interrupt.recv() => {
                    info!("Interrupted");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Terminated");
                    break;
                }
            }
        }

        if let Err(err) = self.detector.client().disconnect().await {
            warn!("Error disconnecting notifier: {}", err);
        }
        info!("Exiting detection loop");

        Ok(())
    }

    /// One detection cycle, bounded by the interval. Failures are logged and
    /// retried on the next tick.
    async fn cycle(&mut self) {
        let limit = self.detector.config().interval;
        match tokio::time::timeout(limit, self.detector.detect()).await {
            Ok(Ok(Outcome::Unchanged)) => debug!("Presence unchanged"),
            Ok(Ok(outcome)) => debug!("Detection cycle finished: {:?}", outcome),
            Ok(Err(err)) => error!("Error detecting presence: {}", err),
            Err(_) => error!("Detection cycle did not finish within {:?}", limit),
        }
    }

    /// Reloads the configuration, restarting `ticker` when the interval changed.
    async fn handle_reload(&mut self, ticker: &mut Interval) {
        let interval = self.detector.config().interval;
        if let Err(err) = self.reload().await {
            error!("Error reloading configuration, keeping the current one: {:#}", err);
        } else if self.detector.config().interval != interval {
            info!("Interval changed to {:?}", self.detector.config().interval);
            *ticker = ticker_after(self.detector.config().interval);
        }
    }

    async fn reload(&mut self) -> anyhow::Result<()> {
        info!("Reloading configuration from {}", self.config_path.display());
        let config = load_config(&self.config_path, &self.interfaces)
            .with_context(|| format!("loading {}", self.config_path.display()))?;
        config.log_values();

        if config.sudo != self.detector.config().sudo {
            warn!("Changing sudo takes effect after a restart");
        }

        if config.notifier != self.detector.config().notifier {
            let client = build_notifier(&config.notifier, self.scan_tx.clone())
                .context("building notifier")?;
            let previous = self.detector.set_client(client);
            if let Err(err) = previous.disconnect().await {
                warn!("Error disconnecting previous notifier: {}", err);
            }
            info!("Replaced notifier");
        }

        self.detector.set_config(config);
        Ok(())
    }

    #[cfg(test)]
    fn detector(&self) -> &Detector {
        &self.detector
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Like [`ticker`], without the immediate first tick.
fn ticker_after(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
