//! The join state machine.
//!
//! ```text
//! Idle -> Scanning -> Classifying -> Joining -> AwaitingConfirmation
//!                                                 |-> Connected
//!                                                 |-> NotFound
//!                                                 '-> Failed(reason)
//! ```
//!
//! A [`JoinController`] has no thread of its own. It is driven by whoever
//! delivers events: the caller (`start`, `cancel`), the event bus (scan and
//! connectivity handlers) and the timer. Every transition is decided under
//! one mutex, and the resolution callback fires at most once per attempt no
//! matter which of confirmation, deadline or cancellation gets there first.
//!
//! Each attempt carries a generation number. Handlers and deadlines capture
//! the generation they were created for and become inert once it is no
//! longer current, so a restarted controller never acts on events from an
//! earlier attempt.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{JoinError, PlatformError};
use crate::events::{EventBus, EventHandler, Subscription};
use crate::handle::CancelHandle;
use crate::platform::{ProfileId, WifiPlatform};
use crate::profile::{self, TargetNetwork};
use crate::security::classify;
use crate::timer::{Timer, TimerHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    Timeout,
    RadioDisabled,
    Cancelled,
    PlatformError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timed out waiting for the connection"),
            FailureReason::RadioDisabled => f.write_str("WiFi radio is disabled"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::PlatformError(detail) => write!(f, "network layer error: {}", detail),
        }
    }
}

impl From<PlatformError> for FailureReason {
    fn from(err: PlatformError) -> Self {
        FailureReason::PlatformError(err.to_string())
    }
}

/// The single terminal outcome delivered for an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JoinOutcome {
    Connected,
    NotFound,
    Failed(FailureReason),
}

impl JoinOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, JoinOutcome::Connected)
    }

    fn terminal_state(&self) -> AttemptState {
        match self {
            JoinOutcome::Connected => AttemptState::Connected,
            JoinOutcome::NotFound => AttemptState::NotFound,
            JoinOutcome::Failed(reason) => AttemptState::Failed(reason.clone()),
        }
    }
}

impl fmt::Display for JoinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinOutcome::Connected => f.write_str("connected"),
            JoinOutcome::NotFound => f.write_str("network not found"),
            JoinOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Scanning,
    Classifying,
    Joining,
    AwaitingConfirmation,
    Connected,
    NotFound,
    Failed(FailureReason),
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Connected | AttemptState::NotFound | AttemptState::Failed(_)
        )
    }

    fn accepts_confirmation(&self) -> bool {
        matches!(self, AttemptState::Joining | AttemptState::AwaitingConfirmation)
    }
}

pub type ResolutionCallback = Arc<dyn Fn(JoinOutcome) + Send + Sync>;

/// The collaborators a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn WifiPlatform>,
    pub events: Arc<dyn EventBus>,
    pub timer: Arc<dyn Timer>,
}

struct Attempt {
    state: AttemptState,
    generation: u64,
    /// Bumped whenever the deadline is re-armed; older deadlines are ignored.
    deadline_seq: u64,
    scan_subscription: Option<Subscription>,
    connectivity_subscription: Option<Subscription>,
    deadline: Option<TimerHandle>,
    profile: Option<ProfileId>,
}

impl Attempt {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.state.is_terminal()
    }

    fn take_resources(&mut self) -> Vec<CancelHandle> {
        [
            self.scan_subscription.take(),
            self.connectivity_subscription.take(),
            self.deadline.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

struct Inner {
    target: TargetNetwork,
    timeout: Duration,
    platform: Arc<dyn WifiPlatform>,
    events: Arc<dyn EventBus>,
    timer: Arc<dyn Timer>,
    on_resolved: ResolutionCallback,
    attempt: Mutex<Attempt>,
}

/// Drives one join attempt at a time towards `target`.
///
/// Cloning yields another handle to the same controller. Dropping the last
/// handle resolves a running attempt as `Failed(Cancelled)`.
#[derive(Clone)]
pub struct JoinController {
    inner: Arc<Inner>,
}

impl JoinController {
    pub fn new(
        target: TargetNetwork,
        timeout: Duration,
        collaborators: Collaborators,
        on_resolved: impl Fn(JoinOutcome) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                timeout,
                platform: collaborators.platform,
                events: collaborators.events,
                timer: collaborators.timer,
                on_resolved: Arc::new(on_resolved),
                attempt: Mutex::new(Attempt {
                    state: AttemptState::Idle,
                    generation: 0,
                    deadline_seq: 0,
                    scan_subscription: None,
                    connectivity_subscription: None,
                    deadline: None,
                    profile: None,
                }),
            }),
        }
    }

    pub fn target(&self) -> &TargetNetwork {
        &self.inner.target
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn state(&self) -> AttemptState {
        self.inner.attempt.lock().state.clone()
    }

    /// Profile committed by the current or last attempt, if it got that far.
    pub fn profile(&self) -> Option<ProfileId> {
        self.inner.attempt.lock().profile.clone()
    }

    /// Starts an attempt.
    ///
    /// Accepted from `Idle` or after a previous attempt resolved. A disabled
    /// radio resolves the attempt as `Failed(RadioDisabled)` and is also
    /// returned here. Being associated with the target already resolves
    /// `Connected` without scanning.
    ///
    /// The resolution callback runs after the attempt is marked resolved and
    /// the state lock is released. A `start()` issued from another thread in
    /// that gap can begin the next attempt before the previous callback has
    /// returned, so callers that restart concurrently must not rely on
    /// callbacks arriving in attempt order. Restarting from inside the
    /// callback is always ordered.
    pub fn start(&self) -> Result<(), JoinError> {
        let inner = &self.inner;

        let (generation, seq) = {
            let mut attempt = inner.attempt.lock();
            if attempt.state != AttemptState::Idle && !attempt.state.is_terminal() {
                warn!(network = %inner.target.name, state = ?attempt.state, "start rejected");
                return Err(JoinError::AlreadyRunning);
            }
            attempt.generation += 1;
            attempt.deadline_seq = 0;
            attempt.profile = None;
            attempt.state = AttemptState::Scanning;
            (attempt.generation, attempt.deadline_seq)
        };
        info!(network = %inner.target.name, generation, timeout = ?inner.timeout, "join attempt started");

        if !inner.platform.is_radio_enabled() {
            inner.resolve(generation, JoinOutcome::Failed(FailureReason::RadioDisabled));
            return Err(JoinError::RadioDisabled);
        }

        if inner.is_associated_with_target() {
            info!(network = %inner.target.name, "already associated with target");
            inner.resolve(generation, JoinOutcome::Connected);
            return Ok(());
        }

        // The deadline covers the scan too, so a scan that never reports
        // cannot hang the attempt
        let deadline = Inner::arm_deadline(inner, generation, seq);
        inner.keep_if(generation, deadline, |a| &mut a.deadline, move |a| {
            a.deadline_seq == seq
        });

        let subscription = inner
            .events
            .on_scan_results(Inner::handler(inner, generation, Inner::on_scan_results));
        inner.keep_if(generation, subscription, |a| &mut a.scan_subscription, |a| {
            a.state == AttemptState::Scanning
        });

        debug!(network = %inner.target.name, generation, "requesting scan");
        if let Err(e) = inner.platform.request_scan() {
            inner.resolve(generation, JoinOutcome::Failed(e.into()));
        }

        Ok(())
    }

    /// Cancels the running attempt, resolving it as `Failed(Cancelled)`.
    ///
    /// Subscriptions and the deadline are torn down before this returns.
    /// A no-op once the attempt resolved.
    pub fn cancel(&self) {
        let resolved = self.inner.finish(
            |_| true,
            JoinOutcome::Failed(FailureReason::Cancelled),
        );
        if !resolved {
            debug!(network = %self.inner.target.name, "cancel ignored, attempt already resolved");
        }
    }
}

impl Inner {
    fn handler(inner: &Arc<Inner>, generation: u64, on_event: fn(&Arc<Inner>, u64)) -> EventHandler {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                on_event(&inner, generation);
            }
        })
    }

    fn arm_deadline(inner: &Arc<Inner>, generation: u64, seq: u64) -> TimerHandle {
        let weak = Arc::downgrade(inner);
        inner.timer.after(
            inner.timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::on_deadline(&inner, generation, seq);
                }
            }),
        )
    }

    fn is_associated_with_target(&self) -> bool {
        self.platform
            .current_association()
            .is_some_and(|a| a.connected && self.target.matches(&a.name))
    }

    /// Stores `handle` in `slot` while the attempt is current and `accept`
    /// agrees, cancelling whatever the slot held before. Otherwise the handle
    /// itself is cancelled.
    fn keep_if(
        &self,
        generation: u64,
        handle: CancelHandle,
        slot: fn(&mut Attempt) -> &mut Option<CancelHandle>,
        accept: impl FnOnce(&Attempt) -> bool,
    ) {
        let discarded = {
            let mut attempt = self.attempt.lock();
            if attempt.is_current(generation) && accept(&*attempt) {
                slot(&mut *attempt).replace(handle)
            } else {
                Some(handle)
            }
        };
        if let Some(handle) = discarded {
            handle.cancel();
        }
    }

    fn advance(&self, generation: u64, from: AttemptState, to: AttemptState) -> bool {
        let mut attempt = self.attempt.lock();
        if attempt.generation != generation || attempt.state != from {
            trace!(generation, from = ?from, current = ?attempt.state, "transition skipped");
            return false;
        }
        debug!(network = %self.target.name, generation, from = ?from, to = ?to, "transition");
        attempt.state = to;
        true
    }

    fn on_scan_results(inner: &Arc<Inner>, generation: u64) {
        let subscription = {
            let mut attempt = inner.attempt.lock();
            if attempt.generation != generation || attempt.state != AttemptState::Scanning {
                trace!(generation, "scan event ignored");
                return;
            }
            attempt.state = AttemptState::Classifying;
            attempt.scan_subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }

        let records = match inner.platform.list_last_scan_results() {
            Ok(records) => records,
            Err(e) => {
                inner.resolve(generation, JoinOutcome::Failed(e.into()));
                return;
            }
        };

        let Some(record) = records.iter().find(|r| r.name == inner.target.name) else {
            info!(network = %inner.target.name, scanned = records.len(), "target not in scan results");
            inner.resolve(generation, JoinOutcome::NotFound);
            return;
        };

        let security = classify(&record.capability_tokens);
        let config = profile::build(&inner.target, security, &inner.target.credential);
        debug!(network = %inner.target.name, %security, "classified target network");

        if !inner.advance(generation, AttemptState::Classifying, AttemptState::Joining) {
            return;
        }

        // Subscribe before committing so a fast association is not missed
        let subscription = inner.events.on_connectivity_changed(Inner::handler(
            inner,
            generation,
            Inner::on_connectivity_changed,
        ));
        inner.keep_if(
            generation,
            subscription,
            |a| &mut a.connectivity_subscription,
            |a| a.state.accepts_confirmation(),
        );

        // A cancel or deadline may have resolved the attempt meanwhile; the
        // network layer must not be touched after that
        {
            let attempt = inner.attempt.lock();
            if !attempt.is_current(generation) || attempt.state != AttemptState::Joining {
                debug!(network = %inner.target.name, generation, state = ?attempt.state, "commit skipped");
                return;
            }
        }

        let profile = match inner.platform.apply_profile(&config) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(network = %inner.target.name, "profile commit failed: {}", e);
                inner.resolve(generation, JoinOutcome::Failed(e.into()));
                return;
            }
        };

        let seq = {
            let mut attempt = inner.attempt.lock();
            if attempt.generation != generation {
                return;
            }
            attempt.profile = Some(profile.clone());
            if attempt.state != AttemptState::Joining {
                // Confirmed or cancelled while committing
                return;
            }
            attempt.state = AttemptState::AwaitingConfirmation;
            attempt.deadline_seq += 1;
            attempt.deadline_seq
        };
        info!(network = %inner.target.name, generation, %profile, "profile committed, awaiting confirmation");

        let deadline = Inner::arm_deadline(inner, generation, seq);
        inner.keep_if(generation, deadline, |a| &mut a.deadline, move |a| {
            a.deadline_seq == seq && a.state == AttemptState::AwaitingConfirmation
        });
    }

    fn on_connectivity_changed(inner: &Arc<Inner>, generation: u64) {
        {
            let attempt = inner.attempt.lock();
            if attempt.generation != generation || !attempt.state.accepts_confirmation() {
                trace!(generation, "connectivity event ignored");
                return;
            }
        }

        if inner.is_associated_with_target() {
            inner.resolve(generation, JoinOutcome::Connected);
        } else {
            trace!(network = %inner.target.name, "not yet associated with target");
        }
    }

    fn on_deadline(inner: &Arc<Inner>, generation: u64, seq: u64) {
        {
            let attempt = inner.attempt.lock();
            if !attempt.is_current(generation) || attempt.deadline_seq != seq {
                trace!(generation, seq, "stale deadline ignored");
                return;
            }
        }

        // Last look before giving up: the confirmation event may have been lost
        let outcome = if inner.is_associated_with_target() {
            JoinOutcome::Connected
        } else {
            JoinOutcome::Failed(FailureReason::Timeout)
        };
        inner.resolve(generation, outcome);
    }

    fn resolve(&self, generation: u64, outcome: JoinOutcome) -> bool {
        self.finish(|attempt| attempt.generation == generation, outcome)
    }

    /// Resolves the attempt if it is not terminal and `accept` agrees.
    ///
    /// Teardown happens before the callback fires. The callback runs without
    /// the state lock held, so it may call back into the controller.
    fn finish(&self, accept: impl FnOnce(&Attempt) -> bool, outcome: JoinOutcome) -> bool {
        let (generation, resources) = {
            let mut attempt = self.attempt.lock();
            if attempt.state.is_terminal() || !accept(&*attempt) {
                debug!(network = %self.target.name, %outcome, "resolution discarded");
                return false;
            }
            attempt.state = outcome.terminal_state();
            (attempt.generation, attempt.take_resources())
        };

        for handle in resources {
            handle.cancel();
        }

        match &outcome {
            JoinOutcome::Connected => info!(network = %self.target.name, generation, "attempt resolved: {}", outcome),
            _ => warn!(network = %self.target.name, generation, "attempt resolved: {}", outcome),
        }
        (self.on_resolved)(outcome);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // An attempt still in flight is abandoned with its owner
        self.finish(
            |attempt| attempt.state != AttemptState::Idle,
            JoinOutcome::Failed(FailureReason::Cancelled),
        );
        for handle in self.attempt.get_mut().take_resources() {
            handle.cancel();
        }
    }
}
