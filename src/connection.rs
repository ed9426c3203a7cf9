//! Association queries and profile commits through NetworkManager.
//!
//! # Requirements
//!
//! - NetworkManager must be installed and running
//! - The `nmcli` command must be available in PATH
//! - User must have permission to manage network connections
//!
//! Committing a [`JoinConfiguration`] replaces any profile with the same
//! name, drops the current association and then activates the new profile
//! in the background. Activation progress is observed through connectivity
//! events, never by waiting here.

use std::thread;
use tracing::{debug, info, warn};

use crate::error::PlatformError;
use crate::nmcli;
use crate::platform::{Association, ProfileId};
use crate::profile::{JoinConfiguration, KeyManagement};
use crate::security::SecurityKind;

/// NetworkManager device state for a fully activated device.
const NM_DEVICE_STATE_ACTIVATED: u32 = 100;

/// Returns the current association of `interface`, if it has one.
///
/// The association is `connected` only once the device reached the
/// activated state; an SSID that is still being negotiated is reported with
/// `connected: false`.
pub fn current_association(interface: &str) -> Result<Option<Association>, PlatformError> {
    let state = device_state(interface)?;
    let active = nmcli::run(&[
        "-t",
        "-f",
        "ACTIVE,SSID",
        "device",
        "wifi",
        "list",
        "ifname",
        interface,
        "--rescan",
        "no",
    ])?;

    Ok(parse_active_ssid(&active).map(|name| Association {
        connected: state == NM_DEVICE_STATE_ACTIVATED,
        name,
    }))
}

/// Reads the numeric `GENERAL.STATE` of `interface`.
pub fn device_state(interface: &str) -> Result<u32, PlatformError> {
    let stdout = nmcli::run(&["-t", "-f", "GENERAL.STATE", "device", "show", interface])?;
    parse_device_state(&stdout)
}

fn parse_device_state(output: &str) -> Result<u32, PlatformError> {
    // "GENERAL.STATE:100 (connected)"
    nmcli::parse_key_values(output)
        .into_iter()
        .find(|(key, _)| key == "GENERAL.STATE")
        .and_then(|(_, value)| value.split_whitespace().next()?.parse().ok())
        .ok_or_else(|| PlatformError::NmcliParse(format!("no device state in: {}", output.trim())))
}

fn parse_active_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .map(nmcli::split_terse)
        .find(|fields| fields.len() == 2 && fields[0] == "yes" && !fields[1].is_empty())
        .map(|mut fields| fields.swap_remove(1))
}

/// Commits `config` on `interface` and starts activating it.
///
/// Steps: delete any profile already named after the network, add the new
/// profile, disconnect the device, then run `nmcli connection up` for the
/// new profile on a background thread. Activating a profile on a device
/// makes it the only active profile there.
pub fn apply_profile(interface: &str, config: &JoinConfiguration) -> Result<ProfileId, PlatformError> {
    let profile = commit_profile(nmcli::run, interface, config)?;

    let interface = interface.to_string();
    let uuid = profile.0.clone();
    thread::spawn(move || {
        match nmcli::run(&["connection", "up", "uuid", &uuid, "ifname", &interface]) {
            Ok(_) => debug!(%uuid, "profile activation finished"),
            Err(e) => warn!(%uuid, "profile activation failed: {}", e),
        }
    });

    Ok(profile)
}

/// Adds the profile and releases the device. A profile that was added but
/// could not be followed by a disconnect is removed again.
fn commit_profile<R>(run: R, interface: &str, config: &JoinConfiguration) -> Result<ProfileId, PlatformError>
where
    R: Fn(&[&str]) -> Result<String, PlatformError>,
{
    if let Err(e) = run(&["connection", "delete", "id", &config.name]) {
        debug!(network = %config.name, "no previous profile removed: {}", e);
    }

    let args = profile_args(interface, config);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let stdout = run(&arg_refs)
        .map_err(|e| PlatformError::ProfileRejected(config.name.clone(), e.to_string()))?;
    let profile = parse_added_uuid(&stdout)?;
    info!(network = %config.name, %profile, security = %config.security, "profile added");

    if let Err(e) = release_device(&run, interface) {
        warn!(network = %config.name, %profile, "disconnect failed, removing new profile: {}", e);
        if let Err(cleanup) = run(&["connection", "delete", "uuid", &profile.0]) {
            warn!(%profile, "profile left behind: {}", cleanup);
        }
        return Err(e);
    }

    Ok(profile)
}

/// Disconnects `interface`. An already idle device is not an error.
pub fn disconnect(interface: &str) -> Result<(), PlatformError> {
    release_device(nmcli::run, interface)
}

fn release_device<R>(run: R, interface: &str) -> Result<(), PlatformError>
where
    R: Fn(&[&str]) -> Result<String, PlatformError>,
{
    match run(&["device", "disconnect", interface]) {
        Ok(_) => Ok(()),
        Err(PlatformError::NmcliExecution(msg)) if msg.contains("not active") => {
            debug!(interface, "device was not active");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn profile_args(interface: &str, config: &JoinConfiguration) -> Vec<String> {
    let mut args: Vec<String> = [
        "connection",
        "add",
        "type",
        "wifi",
        "ifname",
        interface,
        "con-name",
        config.name.as_str(),
        "ssid",
        config.name.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let key_mgmt = match config.key_management {
        KeyManagement::None => "none",
        KeyManagement::WpaPsk => "wpa-psk",
    };

    match config.security {
        SecurityKind::PresharedKey => {
            push_setting(&mut args, "wifi-sec.key-mgmt", key_mgmt);
            if let Some(psk) = &config.pre_shared_key {
                push_setting(&mut args, "wifi-sec.psk", psk);
            }
        }
        SecurityKind::LegacyWep => {
            push_setting(&mut args, "wifi-sec.key-mgmt", key_mgmt);
            if let Some(key) = &config.wep_keys[0] {
                push_setting(&mut args, "wifi-sec.wep-key0", key);
            }
            let index = config.wep_key_index.unwrap_or(0).to_string();
            push_setting(&mut args, "wifi-sec.wep-tx-keyidx", &index);
            push_setting(&mut args, "wifi-sec.wep-key-type", "key");
        }
        // Open networks carry no wifi-sec section at all
        SecurityKind::Open => {}
    }

    args
}

fn push_setting(args: &mut Vec<String>, key: &str, value: &str) {
    args.push(key.to_string());
    args.push(value.to_string());
}

fn parse_added_uuid(output: &str) -> Result<ProfileId, PlatformError> {
    // "Connection 'Meeting Room' (3b8a...-...) successfully added."
    output
        .rfind('(')
        .and_then(|start| {
            let rest = &output[start + 1..];
            rest.find(')').map(|end| rest[..end].to_string())
        })
        .filter(|uuid| !uuid.is_empty())
        .map(ProfileId)
        .ok_or_else(|| PlatformError::NmcliParse(format!("no profile uuid in: {}", output.trim())))
}

/// Prints the association of `interface` in a human-readable format.
///
/// ```text
/// Interface: wlan0
/// Network:   Meeting Room
/// Connected: yes
/// ```
pub fn display_association(interface: &str, association: Option<&Association>) {
    println!("Interface: {}", interface);
    match association {
        Some(assoc) => {
            println!("Network:   {}", assoc.name);
            println!("Connected: {}", if assoc.connected { "yes" } else { "no" });
        }
        None => println!("Network:   (none)"),
    }
}
