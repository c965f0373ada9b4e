//! Home network presence detection.
//!
//! A [`detector::Detector`] probes the local neighbor table for a fixed set
//! of hardware addresses, folds the answers into one debounced presence
//! signal and hands changes to a [`notifier::Notifier`].

pub mod arping;
pub mod config;
pub mod daemon;
pub mod detector;
pub mod ifttt;
pub mod messages;
pub mod mqtt;
pub mod neighbors;
pub mod notifier;
pub mod state;
#[cfg(test)]
mod testing;
