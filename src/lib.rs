//! WiFi join library.
//!
//! Drives one attempt to join a specific wireless network: scan, detect the
//! network's security, build and commit a profile, then wait for the
//! association to be confirmed or for the deadline to pass. The outcome is
//! delivered exactly once through a resolution callback.
//!
//! # Modules
//!
//! - [`controller`] - The join state machine
//! - [`security`] - Security detection from scan capabilities
//! - [`profile`] - Join configuration building
//! - [`events`] - Scan and connectivity event subscriptions
//! - [`timer`] - Cancellable one-shot deadlines
//! - [`platform`] - Network layer interface and its NetworkManager implementation
//! - [`config`] - Settings file
//! - [`error`] - Error types
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wifi_join::{
//!     Collaborators, JoinController, LocalEventBus, NetworkManagerPlatform, TargetNetwork,
//!     TokioTimer,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let events = Arc::new(LocalEventBus::new());
//! let platform = Arc::new(NetworkManagerPlatform::new("wlan0", events.clone()));
//!
//! let controller = JoinController::new(
//!     TargetNetwork::new("Meeting Room", "Avanti123"),
//!     Duration::from_secs(30),
//!     Collaborators {
//!         platform,
//!         events,
//!         timer: Arc::new(TokioTimer::current()),
//!     },
//!     |outcome| println!("join finished: {}", outcome),
//! );
//!
//! controller.start().expect("join could not start");
//! # }
//! ```

/// Settings file handling.
pub mod config;

/// Association queries and profile commits through nmcli.
pub mod connection;

/// The join state machine.
pub mod controller;

/// Error types for the library.
pub mod error;

/// Event subscriptions for scan results and connectivity changes.
pub mod events;

/// Run-once teardown handles for subscriptions and timers.
pub mod handle;

/// WiFi interface discovery.
pub mod interface;

/// nmcli invocation and terse output parsing.
pub mod nmcli;

/// Network layer interface consumed by the controller.
pub mod platform;

/// Target networks and join configuration building.
pub mod profile;

/// Scan result listing through nmcli.
pub mod scan;

/// Security detection from scan capability tokens.
pub mod security;

/// Cancellable one-shot deadlines.
pub mod timer;

pub use controller::{
    AttemptState, Collaborators, FailureReason, JoinController, JoinOutcome, ResolutionCallback,
};

pub use error::{JoinError, PlatformError};

pub use events::{EventBus, EventHandler, LocalEventBus, Subscription};

pub use handle::CancelHandle;

pub use interface::{WifiInterface, list_wifi_interfaces, resolve_interface};

pub use platform::{
    Association, NetworkManagerPlatform, NmcliMonitor, ProfileId, ScanRecord, WifiPlatform,
};

pub use profile::{JoinConfiguration, TargetNetwork};

pub use security::{SecurityKind, classify};

pub use timer::{Timer, TimerCallback, TimerHandle, TokioTimer};
