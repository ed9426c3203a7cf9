//! WiFi scanning through NetworkManager.
//!
//! Scanning is split in two steps so the join flow can stay event driven:
//!
//! 1. [`trigger_rescan`] asks the interface for a fresh scan (this blocks
//!    until nmcli returns, so callers run it off the controller's path)
//! 2. Wait [`SCAN_SETTLE`]: nmcli returns once the scan is requested, not
//!    once it has completed
//! 3. [`list_scan_records`] reads the cached results without rescanning
//!
//! Each result becomes a [`ScanRecord`] whose capability tokens are the
//! SECURITY words (`WPA2`, `WEP`, ...) plus the upper-cased WPA/RSN flags
//! (`PAIR_CCMP`, `PSK`, `SAE`, ...).

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::error::PlatformError;
use crate::nmcli;
use crate::platform::ScanRecord;
use crate::security::classify;

/// Time for a requested scan to land in NetworkManager's cache.
/// 500ms is enough for most adapters.
pub const SCAN_SETTLE: Duration = Duration::from_millis(500);

/// Triggers a rescan on `interface`.
///
/// nmcli refuses while a scan is already in progress; that error is
/// returned as-is and callers usually just read the cached results.
pub fn trigger_rescan(interface: &str) -> Result<(), PlatformError> {
    nmcli::run(&["device", "wifi", "rescan", "ifname", interface]).map(|_| ())
}

/// Lists the networks from the last completed scan on `interface`.
pub fn list_scan_records(interface: &str) -> Result<Vec<ScanRecord>, PlatformError> {
    let stdout = nmcli::run(&[
        "-t",
        "-f",
        "SSID,SECURITY,WPA-FLAGS,RSN-FLAGS",
        "device",
        "wifi",
        "list",
        "ifname",
        interface,
        "--rescan",
        "no",
    ])?;

    let records = parse_scan_list(&stdout)?;
    debug!(interface, count = records.len(), "listed scan results");
    Ok(records)
}

fn parse_scan_list(output: &str) -> Result<Vec<ScanRecord>, PlatformError> {
    let mut records = Vec::new();
    // Same SSID from several access points: keep the first
    let mut seen = HashSet::new();

    for line in output.lines().filter(|l| !l.is_empty()) {
        let fields = nmcli::split_terse(line);
        if fields.len() != 4 {
            return Err(PlatformError::NmcliParse(format!(
                "expected 4 scan fields, got {}: {}",
                fields.len(),
                line
            )));
        }

        let name = fields[0].clone();
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }

        let mut tokens: BTreeSet<String> = fields[1]
            .split_whitespace()
            .filter(|t| *t != "--")
            .map(str::to_string)
            .collect();
        for flags in &fields[2..] {
            tokens.extend(
                flags
                    .split_whitespace()
                    .filter(|f| *f != "--")
                    .map(str::to_uppercase),
            );
        }

        records.push(ScanRecord {
            name,
            capability_tokens: tokens,
        });
    }

    Ok(records)
}

/// Prints scan records with their classified security.
///
/// ```text
/// SSID                             SECURITY  CAPABILITIES
/// ------------------------------------------------------------
/// Meeting Room                     PSK       GROUP_CCMP PAIR_CCMP PSK WPA2
/// ```
pub fn display_records(records: &[ScanRecord]) {
    if records.is_empty() {
        println!("No networks found.");
        return;
    }

    println!("{:<32} {:<9} {}", "SSID", "SECURITY", "CAPABILITIES");
    println!("{}", "-".repeat(60));

    for record in records {
        let tokens: Vec<&str> = record.capability_tokens.iter().map(String::as_str).collect();
        println!(
            "{:<32} {:<9} {}",
            truncate_name(&record.name, 32),
            classify(&record.capability_tokens).to_string(),
            tokens.join(" ")
        );
    }
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() > max_len {
        let kept: String = name.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    } else {
        name.to_string()
    }
}
