use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use mac_address::MacAddress;
use tokio::sync::mpsc;

use presence_rs::config::{SystemInterfaces, load_config};
use presence_rs::daemon::Daemon;
use presence_rs::detector::Detector;
use presence_rs::neighbors::{ArpProber, NeighborProber as _};
use presence_rs::notifier::build_notifier;

#[derive(Parser, Debug)]
#[command(name = "presence")]
#[command(about = "Home network presence detection daemon")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "presence.toml", global = true)]
    config: PathBuf,

    /// Show debug information in log
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect network presence and notify on changes
    Run,
    /// Check configuration and probe dependencies
    Check {
        /// Show config values
        #[arg(short = 'V', long)]
        values: bool,
    },
    /// Probe addresses once on a single interface
    Probe {
        interface: String,
        #[arg(required = true)]
        addresses: Vec<String>,
        /// Probe repetitions per address
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Run arping directly instead of through sudo
        #[arg(long)]
        no_sudo: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug);
    info!("presence-rs version {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run => run(&cli.config).await,
        Command::Check { values } => check(&cli.config, values).await,
        Command::Probe {
            interface,
            addresses,
            count,
            no_sudo,
        } => probe(interface, &addresses, count, !no_sudo).await,
    }
}

fn init_logger(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path, &SystemInterfaces)
        .with_context(|| format!("loading {}", path.display()))?;
    config.log_values();

    let prober = ArpProber::new(config.sudo)
        .await
        .context("finding probe dependencies")?;

    let (scan_tx, scan_rx) = mpsc::channel(1);
    let client = build_notifier(&config.notifier, scan_tx.clone()).context("building notifier")?;

    let detector = Detector::new(config, Box::new(prober), client);
    Daemon::new(
        detector,
        path.to_path_buf(),
        SystemInterfaces,
        scan_tx,
        scan_rx,
    )
    .run_loop()
    .await
}

async fn check(path: &Path, values: bool) -> anyhow::Result<()> {
    let config = load_config(path, &SystemInterfaces)
        .with_context(|| format!("loading {}", path.display()))?;
    if values {
        config.log_values();
    }

    ArpProber::new(config.sudo)
        .await
        .context("finding probe dependencies")?;

    info!("Configuration {} OK", path.display());
    Ok(())
}

async fn probe(interface: String, addresses: &[String], count: u32, sudo: bool) -> anyhow::Result<()> {
    let mut candidates = Vec::with_capacity(addresses.len());
    for address in addresses {
        let mac: MacAddress = address
            .parse()
            .map_err(|e| anyhow!("address {}: {}", address, e))?;
        candidates.push(mac);
    }

    let prober = ArpProber::new(sudo)
        .await
        .context("finding probe dependencies")?;
    let interfaces = HashSet::from([interface]);
    let unique: HashSet<MacAddress> = candidates.iter().copied().collect();
    let confirmed = prober.probe(&interfaces, &unique, count.max(1)).await?;

    for mac in &candidates {
        let live = confirmed.get(mac).copied().unwrap_or(false);
        println!("{}: {}", mac, if live { "present" } else { "absent" });
    }
    let present = confirmed.values().any(|&live| live);
    println!("present: {}", present);

    Ok(())
}
