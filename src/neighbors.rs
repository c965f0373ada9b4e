use std::collections::{HashMap, HashSet};
use std::process::Output;
use std::str::FromStr as _;

use async_trait::async_trait;
use log::debug;
use mac_address::MacAddress;
use serde_derive::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::arping::Arping;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command}: {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("parsing neighbor table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("arp output version mismatch (got {got}, expected {expected})")]
    VersionMismatch { got: String, expected: &'static str },
    #[error("neighbor {ip}: invalid MAC address {address:?}: {reason}")]
    InvalidAddress {
        ip: String,
        address: String,
        reason: String,
    },
    #[error("incompatible \"arping\" command ({0})")]
    Incompatible(String),
}

/// Confirms which candidate addresses are live on the permitted interfaces.
///
/// Every candidate appears in the result. Candidates missing from the
/// neighbor table are `false`. A table entry alone is not enough: each one
/// must answer an active probe.
#[async_trait]
pub trait NeighborProber: Send + Sync {
    async fn probe(
        &self,
        interfaces: &HashSet<String>,
        addresses: &HashSet<MacAddress>,
        count: u32,
    ) -> Result<HashMap<MacAddress, bool>, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: String,
    pub mac: MacAddress,
    pub interface: String,
}

/// Neighbor table via `ip`/`arp`, confirmed with `arping`.
pub struct ArpProber {
    arping: Arping,
}

impl ArpProber {
    /// Fails when the neighbor table tool or a compatible `arping` is missing.
    pub async fn new(sudo: bool) -> Result<Self, ProbeError> {
        let (program, args) = table_command(&HashSet::new());
        let output = run(program, &args).await?;
        check_status(program, &args, &output)?;

        Ok(ArpProber {
            arping: Arping::new(sudo).await?,
        })
    }

    async fn entries(&self, interfaces: &HashSet<String>) -> Result<Vec<NeighborEntry>, ProbeError> {
        let (program, args) = table_command(interfaces);
        let output = run(program, &args).await?;
        check_status(program, &args, &output)?;

        #[cfg(target_os = "freebsd")]
        {
            parse_arp_libxo(&output.stdout)
        }
        #[cfg(not(target_os = "freebsd"))]
        {
            let only = single_interface(interfaces);
            parse_ip_neighbors(&output.stdout, only)
        }
    }
}

#[async_trait]
impl NeighborProber for ArpProber {
    async fn probe(
        &self,
        interfaces: &HashSet<String>,
        addresses: &HashSet<MacAddress>,
        count: u32,
    ) -> Result<HashMap<MacAddress, bool>, ProbeError> {
        let mut confirmed: HashMap<MacAddress, bool> =
            addresses.iter().map(|address| (*address, false)).collect();

        for entry in self.entries(interfaces).await? {
            debug!(
                "Neighbor {} at {} on {}",
                entry.mac, entry.ip, entry.interface
            );
            if !interfaces.is_empty() && !interfaces.contains(&entry.interface) {
                continue;
            }
            // unknown, or already answered at another IP
            if confirmed.get(&entry.mac) != Some(&false) {
                continue;
            }
            let live = self
                .arping
                .ping(&entry.interface, entry.mac, &entry.ip, count)
                .await?;
            confirmed.insert(entry.mac, live);
        }

        Ok(confirmed)
    }
}

#[cfg(not(target_os = "freebsd"))]
fn single_interface(interfaces: &HashSet<String>) -> Option<&str> {
    if interfaces.len() == 1 {
        interfaces.iter().next().map(String::as_str)
    } else {
        None
    }
}

#[cfg(not(target_os = "freebsd"))]
fn table_command(interfaces: &HashSet<String>) -> (&'static str, Vec<String>) {
    // every NUD state is listed, not just reachable; stale entries are confirmed by arping
    let mut args: Vec<String> = ["-family", "inet", "-json", "neighbor", "show"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(interface) = single_interface(interfaces) {
        args.push("dev".to_string());
        args.push(interface.to_string());
    }
    ("ip", args)
}

#[cfg(target_os = "freebsd")]
fn table_command(_interfaces: &HashSet<String>) -> (&'static str, Vec<String>) {
    ("arp", vec!["--libxo=json".to_string(), "-an".to_string()])
}

#[derive(Deserialize, Debug)]
struct IpNeighbor {
    dst: String,
    dev: Option<String>,
    lladdr: Option<String>,
    #[serde(default)]
    state: Vec<String>,
}

/// Parses `ip -json neighbor show`. `ip` leaves out `dev` when the listing
/// was restricted to one device, so that device is filled back in.
pub fn parse_ip_neighbors(
    json: &[u8],
    only_interface: Option<&str>,
) -> Result<Vec<NeighborEntry>, ProbeError> {
    let neighbors: Vec<IpNeighbor> = serde_json::from_slice(json)?;
    let mut entries = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        if neighbor
            .state
            .iter()
            .any(|s| s.eq_ignore_ascii_case("FAILED") || s.eq_ignore_ascii_case("INCOMPLETE"))
        {
            continue;
        }
        let Some(lladdr) = neighbor.lladdr else {
            continue;
        };
        let Some(interface) = neighbor.dev.or_else(|| only_interface.map(str::to_string)) else {
            continue;
        };
        entries.push(NeighborEntry {
            mac: parse_mac(&neighbor.dst, &lladdr)?,
            ip: neighbor.dst,
            interface,
        });
    }
    Ok(entries)
}

const ARP_OUTPUT_VERSION: &str = "1";

#[derive(Deserialize, Debug)]
struct ArpOutput {
    #[serde(rename = "__version")]
    version: String,
    arp: ArpCache,
}

#[derive(Deserialize, Debug)]
struct ArpCache {
    #[serde(rename = "arp-cache", default)]
    cache: Vec<ArpCacheEntry>,
}

#[derive(Deserialize, Debug)]
struct ArpCacheEntry {
    #[serde(rename = "ip-address")]
    ip_address: String,
    #[serde(rename = "mac-address")]
    mac_address: String,
    interface: String,
}

/// Parses FreeBSD `arp --libxo=json -an`.
pub fn parse_arp_libxo(json: &[u8]) -> Result<Vec<NeighborEntry>, ProbeError> {
    let output: ArpOutput = serde_json::from_slice(json)?;
    if output.version != ARP_OUTPUT_VERSION {
        return Err(ProbeError::VersionMismatch {
            got: output.version,
            expected: ARP_OUTPUT_VERSION,
        });
    }

    let mut entries = Vec::with_capacity(output.arp.cache.len());
    for entry in output.arp.cache {
        if entry.mac_address == "(incomplete)" {
            continue;
        }
        entries.push(NeighborEntry {
            mac: parse_mac(&entry.ip_address, &entry.mac_address)?,
            ip: entry.ip_address,
            interface: entry.interface,
        });
    }
    Ok(entries)
}

fn parse_mac(ip: &str, address: &str) -> Result<MacAddress, ProbeError> {
    MacAddress::from_str(address).map_err(|e| ProbeError::InvalidAddress {
        ip: ip.to_string(),
        address: address.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs a command to completion. The child is killed if the future is dropped.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<Output, ProbeError> {
    debug!("Running {}", command_line(program, args));
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            command: command_line(program, args),
            source,
        })
}

pub(crate) fn check_status(program: &str, args: &[String], output: &Output) -> Result<(), ProbeError> {
    if output.status.success() {
        return Ok(());
    }
    Err(ProbeError::Failed {
        command: command_line(program, args),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
