//! Network interface bring-up
//!
//! The bridge starts before the wired link is guaranteed to be up. Boot waits
//! until the configured interface reports `up` in sysfs, optionally bounded by
//! a deadline. Drivers that leave operstate at `unknown` count as up once
//! `carrier` reads `1`. DHCP itself is left to the host.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

pub const SYSFS_NET: &str = "/sys/class/net";

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Interface {interface} not up after {waited:?}")]
    Timeout { interface: String, waited: Duration },
    #[error("Failed to read operstate of {interface}: {source}")]
    Operstate {
        interface: String,
        #[source]
        source: io::Error,
    },
}

/// Operational state as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
    /// Interface not present yet
    Missing,
    /// Driver does not report operstate; carrier decides
    Unknown,
    Other,
}

impl OperState {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "up" => OperState::Up,
            "down" | "lowerlayerdown" | "dormant" | "notpresent" => OperState::Down,
            "unknown" => OperState::Unknown,
            _ => OperState::Other,
        }
    }
}

/// Watches `{sys_root}/{interface}/operstate` and, as a fallback, `carrier`
#[derive(Debug, Clone)]
pub struct InterfaceMonitor {
    interface: String,
    operstate_path: PathBuf,
    carrier_path: PathBuf,
    poll_interval: Duration,
}

impl InterfaceMonitor {
    pub fn new(interface: &str) -> Self {
        Self::with_root(Path::new(SYSFS_NET), interface)
    }

    pub fn with_root(sys_root: &Path, interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            operstate_path: sys_root.join(interface).join("operstate"),
            carrier_path: sys_root.join(interface).join("carrier"),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current state, with `unknown` resolved through the carrier flag
    pub async fn operstate(&self) -> Result<OperState, NetworkError> {
        match tokio::fs::read_to_string(&self.operstate_path).await {
            Ok(raw) => match OperState::parse(&raw) {
                OperState::Unknown if self.has_carrier().await => Ok(OperState::Up),
                state => Ok(state),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(OperState::Missing),
            Err(source) => Err(NetworkError::Operstate {
                interface: self.interface.clone(),
                source,
            }),
        }
    }

    /// Reading `carrier` fails with EINVAL while the interface is admin-down
    async fn has_carrier(&self) -> bool {
        matches!(
            tokio::fs::read_to_string(&self.carrier_path).await,
            Ok(raw) if raw.trim() == "1"
        )
    }

    /// Block until the interface is up. `None` waits forever.
    pub async fn wait_until_up(&self, timeout: Option<Duration>) -> Result<(), NetworkError> {
        let started = Instant::now();
        let mut last = None;

        loop {
            let state = self.operstate().await?;
            if state == OperState::Up {
                info!(interface = %self.interface, waited_ms = started.elapsed().as_millis() as u64, "Network interface up");
                return Ok(());
            }
            if last != Some(state) {
                debug!(interface = %self.interface, ?state, "Waiting for network interface");
                last = Some(state);
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(NetworkError::Timeout {
                        interface: self.interface.clone(),
                        waited: started.elapsed(),
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Wait for `interface` to come up, announcing `hostname` in the logs
pub async fn bring_up(
    hostname: &str,
    interface: &str,
    timeout: Option<Duration>,
) -> Result<(), NetworkError> {
    info!(hostname, interface, "Bringing up network");
    InterfaceMonitor::new(interface).wait_until_up(timeout).await
}
