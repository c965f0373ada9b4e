use log::debug;
use mac_address::MacAddress;

use crate::neighbors::{ProbeError, check_status, command_line, run};

const ARPING: &str = "arping";
const SUDO: &str = "sudo";
const BANNER: &str = "ARPing ";
const BANNER_PREVIEW_CHARS: usize = 32;

/// Active link-layer probe using Thomas Habets' `arping`.
#[derive(Debug, Clone)]
pub struct Arping {
    sudo: bool,
}

impl Arping {
    pub async fn new(sudo: bool) -> Result<Self, ProbeError> {
        let args = vec!["--help".to_string()];
        let output = run(ARPING, &args).await?;
        let help = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(ProbeError::Incompatible(output.status.to_string()));
        }
        check_banner(&help)?;

        if sudo {
            let args = vec!["-V".to_string()];
            let output = run(SUDO, &args).await?;
            check_status(SUDO, &args, &output)?;
        }

        Ok(Arping { sudo })
    }

    fn command(&self, interface: &str, mac: MacAddress, ip: &str, count: u32) -> (&'static str, Vec<String>) {
        let mut args = Vec::with_capacity(10);
        let program = if self.sudo {
            args.push(ARPING.to_string());
            SUDO
        } else {
            ARPING
        };
        args.extend([
            "-c".to_string(),
            count.to_string(),
            "-i".to_string(),
            interface.to_string(),
            "-t".to_string(),
            mac.to_string().to_lowercase(),
            "-q".to_string(),
            ip.to_string(),
        ]);
        (program, args)
    }

    /// `Ok(false)` when the target did not answer; an error only when
    /// `arping` itself complained.
    pub async fn ping(&self, interface: &str, mac: MacAddress, ip: &str, count: u32) -> Result<bool, ProbeError> {
        let (program, args) = self.command(interface, mac, ip, count);
        let output = run(program, &args).await?;
        if output.status.success() {
            debug!("{} answered at {} on {}", mac, ip, interface);
            return Ok(true);
        }
        if output.stderr.is_empty() {
            debug!("{} did not answer at {} on {}", mac, ip, interface);
            return Ok(false);
        }
        Err(ProbeError::Failed {
            command: command_line(program, &args),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn check_banner(help: &str) -> Result<(), ProbeError> {
    if help.starts_with(BANNER) {
        return Ok(());
    }
    let line = help.lines().next().unwrap_or_default();
    let mut preview: String = line.chars().take(BANNER_PREVIEW_CHARS).collect();
    if line.chars().count() > BANNER_PREVIEW_CHARS {
        preview.push('\u{2026}');
    }
    Err(ProbeError::Incompatible(preview))
}
