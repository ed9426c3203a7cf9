use thiserror::Error;

/// Errors surfaced synchronously from [`crate::JoinController::start`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("A join attempt is already running")]
    AlreadyRunning,

    #[error("WiFi radio is disabled")]
    RadioDisabled,
}

/// Failures reported by the network layer adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("No WiFi interface found")]
    NoWifiInterface,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Failed to parse nmcli output: {0}")]
    NmcliParse(String),

    #[error("Failed to spawn '{command}': {reason}")]
    CommandSpawn { command: String, reason: String },

    #[error("Network profile for '{0}' was rejected: {1}")]
    ProfileRejected(String, String),
}
