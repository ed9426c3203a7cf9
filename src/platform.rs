//! The network layer as seen by the join controller.
//!
//! [`WifiPlatform`] is the set of queries and commands the controller
//! consumes. [`NetworkManagerPlatform`] implements it with `nmcli` and feeds a
//! [`LocalEventBus`]: scan completion is published by the rescan thread it
//! starts, connectivity changes by an [`NmcliMonitor`].

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection;
use crate::error::PlatformError;
use crate::events::LocalEventBus;
use crate::profile::JoinConfiguration;
use crate::scan;

/// One network seen by the last scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    pub name: String,
    pub capability_tokens: BTreeSet<String>,
}

impl ScanRecord {
    pub fn new<I, S>(name: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capability_tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

/// The device's current association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Association {
    pub connected: bool,
    pub name: String,
}

/// Identifier the network layer assigned to a committed profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProfileId(pub String);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network layer operations used during a join attempt.
///
/// Calls should return promptly. Anything slow (scanning, activation) is
/// started here and reported later through the event bus.
pub trait WifiPlatform: Send + Sync {
    fn is_radio_enabled(&self) -> bool;

    /// Starts a scan. Completion arrives as a scan-results event.
    fn request_scan(&self) -> Result<(), PlatformError>;

    fn list_last_scan_results(&self) -> Result<Vec<ScanRecord>, PlatformError>;

    fn current_association(&self) -> Option<Association>;

    /// Adds or replaces the profile, drops the current association, makes the
    /// new profile the only enabled one and requests a reconnect.
    fn apply_profile(&self, config: &JoinConfiguration) -> Result<ProfileId, PlatformError>;
}

/// [`WifiPlatform`] for one NetworkManager-managed interface.
pub struct NetworkManagerPlatform {
    interface: String,
    events: Arc<LocalEventBus>,
}

impl NetworkManagerPlatform {
    pub fn new(interface: impl Into<String>, events: Arc<LocalEventBus>) -> Self {
        Self {
            interface: interface.into(),
            events,
        }
    }
}

impl WifiPlatform for NetworkManagerPlatform {
    fn is_radio_enabled(&self) -> bool {
        match crate::nmcli::run(&["radio", "wifi"]) {
            Ok(out) => out.trim() == "enabled",
            Err(e) => {
                warn!("radio status unavailable: {}", e);
                false
            }
        }
    }

    fn request_scan(&self) -> Result<(), PlatformError> {
        let interface = self.interface.clone();
        let events = self.events.clone();

        thread::Builder::new()
            .name("nmcli-rescan".to_string())
            .spawn(move || {
                rescan_and_publish(&interface, scan::SCAN_SETTLE, &events, scan::trigger_rescan)
            })
            .map(|_| ())
            .map_err(|e| PlatformError::CommandSpawn {
                command: "nmcli device wifi rescan".to_string(),
                reason: e.to_string(),
            })
    }

    fn list_last_scan_results(&self) -> Result<Vec<ScanRecord>, PlatformError> {
        scan::list_scan_records(&self.interface)
    }

    fn current_association(&self) -> Option<Association> {
        match connection::current_association(&self.interface) {
            Ok(assoc) => assoc,
            Err(e) => {
                warn!(interface = %self.interface, "association query failed: {}", e);
                None
            }
        }
    }

    fn apply_profile(&self, config: &JoinConfiguration) -> Result<ProfileId, PlatformError> {
        connection::apply_profile(&self.interface, config)
    }
}

/// Requests a scan, waits `settle` for the results to be cached, then
/// announces them.
fn rescan_and_publish(
    interface: &str,
    settle: Duration,
    events: &LocalEventBus,
    rescan: impl FnOnce(&str) -> Result<(), PlatformError>,
) {
    // A refused rescan usually means one is already running; its results
    // are worth waiting for too
    if let Err(e) = rescan(interface) {
        debug!(%interface, "rescan not performed: {}", e);
    }
    thread::sleep(settle);
    events.publish_scan_results();
}

/// Publishes connectivity-changed events from `nmcli monitor`.
///
/// Every monitor line that names the interface or reports global
/// connectivity counts as a change. The child process is killed on drop.
pub struct NmcliMonitor {
    child: Child,
}

impl NmcliMonitor {
    pub fn spawn(interface: &str, events: Arc<LocalEventBus>) -> Result<Self, PlatformError> {
        let mut child = Command::new("nmcli")
            .arg("monitor")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlatformError::CommandSpawn {
                command: "nmcli monitor".to_string(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| PlatformError::CommandSpawn {
            command: "nmcli monitor".to_string(),
            reason: "stdout not captured".to_string(),
        })?;

        let interface = interface.to_string();
        thread::Builder::new()
            .name("nmcli-monitor".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if is_connectivity_line(&interface, &line) {
                        debug!(%line, "connectivity change");
                        events.publish_connectivity_changed();
                    }
                }
                debug!("nmcli monitor exited");
            })
            .map_err(|e| PlatformError::CommandSpawn {
                command: "nmcli monitor".to_string(),
                reason: e.to_string(),
            })?;

        info!("watching NetworkManager for connectivity changes");
        Ok(Self { child })
    }
}

impl Drop for NmcliMonitor {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn is_connectivity_line(interface: &str, line: &str) -> bool {
    // "wlan0: connected", "wlan0: using connection 'x'", "Connectivity is now 'full'"
    line.starts_with(&format!("{}:", interface)) || line.starts_with("Connectivity is now")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_connectivity_lines() {
        assert!(is_connectivity_line("wlan0", "wlan0: connected"));
        assert!(is_connectivity_line("wlan0", "wlan0: disconnected"));
        assert!(is_connectivity_line("wlan0", "Connectivity is now 'full'"));
        assert!(!is_connectivity_line("wlan0", "wlan1: connected"));
        assert!(!is_connectivity_line("wlan0", "Networkmanager is now in the 'connected' state"));
    }

    #[test]
    fn test_scan_announced_after_settle() {
        let events = LocalEventBus::new();
        let announced_at = Arc::new(parking_lot::Mutex::new(None));
        let at = announced_at.clone();
        let _sub = events.on_scan_results(Arc::new(move || {
            *at.lock() = Some(Instant::now());
        }));

        let started = Instant::now();
        let settle = Duration::from_millis(50);
        rescan_and_publish("wlan0", settle, &events, |iface| {
            assert_eq!(iface, "wlan0");
            Ok(())
        });

        let announced_at = announced_at.lock().expect("scan not announced");
        assert!(announced_at - started >= settle);
    }

    #[test]
    fn test_refused_rescan_still_announced() {
        let events = LocalEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = events.on_scan_results(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        rescan_and_publish("wlan0", Duration::ZERO, &events, |_| {
            Err(PlatformError::NmcliExecution("Scanning not allowed while already scanning".into()))
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scan_record_new() {
        let record = ScanRecord::new("Meeting Room", ["WPA2-PSK", "ESS"]);
        assert_eq!(record.name, "Meeting Room");
        assert_eq!(record.capability_tokens.len(), 2);
    }
}
