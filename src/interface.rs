use tracing::debug;

use crate::error::PlatformError;
use crate::nmcli;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
}

/// List all WiFi interfaces known to NetworkManager
pub fn list_wifi_interfaces() -> Result<Vec<WifiInterface>, PlatformError> {
    let stdout = nmcli::run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"])?;
    Ok(parse_device_list(&stdout))
}

fn parse_device_list(output: &str) -> Vec<WifiInterface> {
    output
        .lines()
        .map(nmcli::split_terse)
        .filter(|parts| parts.len() >= 3 && parts[1] == "wifi")
        .map(|parts| WifiInterface {
            name: parts[0].clone(),
            state: parts[2].clone(),
        })
        .collect()
}

/// Find the first WiFi interface
pub fn find_wifi_interface() -> Result<WifiInterface, PlatformError> {
    list_wifi_interfaces()?
        .into_iter()
        .next()
        .ok_or(PlatformError::NoWifiInterface)
}

/// Get a specific interface by name, verifying it's a WiFi interface
pub fn get_interface(name: &str) -> Result<WifiInterface, PlatformError> {
    list_wifi_interfaces()?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| PlatformError::InterfaceNotFound(name.to_string()))
}

/// Resolve interface: use provided name or the first WiFi device
pub fn resolve_interface(interface: Option<&str>) -> Result<WifiInterface, PlatformError> {
    let iface = match interface {
        Some(name) => get_interface(name)?,
        None => find_wifi_interface()?,
    };
    debug!(interface = %iface.name, state = %iface.state, "resolved interface");
    Ok(iface)
}
