//! Test doubles for driving a `JoinController` deterministically.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use wifi_join::{
    Association, CancelHandle, Collaborators, JoinConfiguration, JoinController, JoinOutcome,
    LocalEventBus, PlatformError, ProfileId, ScanRecord, TargetNetwork, Timer, TimerCallback,
    TimerHandle, WifiPlatform,
};

pub const TARGET_NAME: &str = "Meeting Room";
pub const TARGET_CREDENTIAL: &str = "Avanti123";
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs and recordings of a [`ScriptedPlatform`].
pub struct Script {
    pub radio_enabled: bool,
    pub scan_results: Result<Vec<ScanRecord>, PlatformError>,
    pub association: Option<Association>,
    pub apply_error: Option<PlatformError>,
    /// Publish scan-results-available from inside `request_scan`
    pub publish_scan_on_request: bool,
    /// Associate with the committed network and publish a connectivity
    /// change from inside `apply_profile`
    pub connect_on_apply: bool,
    pub scan_requests: usize,
    pub applied: Vec<JoinConfiguration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            radio_enabled: true,
            scan_results: Ok(Vec::new()),
            association: None,
            apply_error: None,
            publish_scan_on_request: false,
            connect_on_apply: false,
            scan_requests: 0,
            applied: Vec::new(),
        }
    }
}

pub struct ScriptedPlatform {
    script: Mutex<Script>,
    events: Arc<LocalEventBus>,
}

impl ScriptedPlatform {
    pub fn new(script: Script, events: Arc<LocalEventBus>) -> Self {
        Self {
            script: Mutex::new(script),
            events,
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut Script)) {
        f(&mut *self.script.lock());
    }

    pub fn associate(&self, name: &str, connected: bool) {
        self.script.lock().association = Some(Association {
            connected,
            name: name.to_string(),
        });
    }

    pub fn scan_requests(&self) -> usize {
        self.script.lock().scan_requests
    }

    pub fn applied(&self) -> Vec<JoinConfiguration> {
        self.script.lock().applied.clone()
    }
}

impl WifiPlatform for ScriptedPlatform {
    fn is_radio_enabled(&self) -> bool {
        self.script.lock().radio_enabled
    }

    fn request_scan(&self) -> Result<(), PlatformError> {
        let publish = {
            let mut script = self.script.lock();
            script.scan_requests += 1;
            script.publish_scan_on_request
        };
        if publish {
            self.events.publish_scan_results();
        }
        Ok(())
    }

    fn list_last_scan_results(&self) -> Result<Vec<ScanRecord>, PlatformError> {
        self.script.lock().scan_results.clone()
    }

    fn current_association(&self) -> Option<Association> {
        self.script.lock().association.clone()
    }

    fn apply_profile(&self, config: &JoinConfiguration) -> Result<ProfileId, PlatformError> {
        let connect = {
            let mut script = self.script.lock();
            if let Some(err) = script.apply_error.clone() {
                return Err(err);
            }
            script.applied.push(config.clone());
            if script.connect_on_apply {
                script.association = Some(Association {
                    connected: true,
                    name: format!("\"{}\"", config.name),
                });
            }
            script.connect_on_apply
        };
        if connect {
            self.events.publish_connectivity_changed();
        }
        Ok(ProfileId(format!("profile-{}", config.name)))
    }
}

struct Armed {
    delay: Duration,
    callback: Option<TimerCallback>,
    cancelled: Arc<AtomicBool>,
}

/// Timer that only fires when the test says so.
#[derive(Default)]
pub struct ManualTimer {
    armed: Mutex<Vec<Armed>>,
}

impl ManualTimer {
    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    /// Timers neither fired nor cancelled.
    pub fn live_count(&self) -> usize {
        self.armed
            .lock()
            .iter()
            .filter(|a| a.callback.is_some() && !a.cancelled.load(Ordering::SeqCst))
            .count()
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.armed.lock().last().map(|a| a.delay)
    }

    /// Fires every live timer. Returns how many fired.
    pub fn fire_live(&self) -> usize {
        let callbacks: Vec<TimerCallback> = self
            .armed
            .lock()
            .iter_mut()
            .filter(|a| !a.cancelled.load(Ordering::SeqCst))
            .filter_map(|a| a.callback.take())
            .collect();
        let fired = callbacks.len();
        for callback in callbacks {
            callback();
        }
        fired
    }

    /// Fires every timer that has not run yet, cancelled or not, as if each
    /// expiry raced its own cancellation.
    pub fn fire_all(&self) -> usize {
        let callbacks: Vec<TimerCallback> = self
            .armed
            .lock()
            .iter_mut()
            .filter_map(|a| a.callback.take())
            .collect();
        let fired = callbacks.len();
        for callback in callbacks {
            callback();
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.armed.lock().push(Armed {
            delay,
            callback: Some(callback),
            cancelled: cancelled.clone(),
        });
        CancelHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}

pub fn target() -> TargetNetwork {
    TargetNetwork::new(TARGET_NAME, TARGET_CREDENTIAL)
}

pub fn record(name: &str, tokens: &[&str]) -> ScanRecord {
    ScanRecord::new(name, tokens.iter().copied())
}

/// A controller wired to scripted collaborators.
pub struct Harness {
    pub platform: Arc<ScriptedPlatform>,
    pub events: Arc<LocalEventBus>,
    pub timer: Arc<ManualTimer>,
    pub outcomes: Arc<Mutex<Vec<JoinOutcome>>>,
    pub controller: JoinController,
}

impl Harness {
    pub fn new(configure: impl FnOnce(&mut Script)) -> Self {
        let mut script = Script::default();
        configure(&mut script);

        let events = Arc::new(LocalEventBus::new());
        let platform = Arc::new(ScriptedPlatform::new(script, events.clone()));
        let timer = Arc::new(ManualTimer::default());
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let sink = outcomes.clone();
        let controller = JoinController::new(
            target(),
            TIMEOUT,
            Collaborators {
                platform: platform.clone(),
                events: events.clone(),
                timer: timer.clone(),
            },
            move |outcome| sink.lock().push(outcome),
        );

        Self {
            platform,
            events,
            timer,
            outcomes,
            controller,
        }
    }

    /// Scan results contain the target with `tokens`.
    pub fn with_target(tokens: &[&str]) -> Self {
        let records = vec![record("Lobby", &[]), record(TARGET_NAME, tokens)];
        Self::new(move |s| s.scan_results = Ok(records))
    }

    pub fn outcomes(&self) -> Vec<JoinOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.events.scan_subscriber_count() + self.events.connectivity_subscriber_count()
    }

    /// Starts and delivers the scan event, leaving the attempt awaiting
    /// confirmation when the target is in the results.
    pub fn start_and_scan(&self) {
        self.controller.start().expect("start");
        self.events.publish_scan_results();
    }
}
