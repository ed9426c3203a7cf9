//! One-shot deadline scheduling.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handle::CancelHandle;

/// Handle for an armed deadline. Cancelling after the callback already ran
/// is a no-op.
pub type TimerHandle = CancelHandle;

pub type TimerCallback = Box<dyn FnOnce() + Send>;

pub trait Timer: Send + Sync {
    /// Runs `callback` once after `delay` unless the returned handle is
    /// cancelled first. Must not run the callback on the calling thread.
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// [`Timer`] backed by a tokio runtime.
///
/// Callbacks run on the runtime's blocking pool, so they may call into the
/// network layer synchronously.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime of the calling context.
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Timer for TokioTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(?delay, "timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    debug!(?delay, "timer fired");
                    if let Err(e) = tokio::task::spawn_blocking(callback).await {
                        tracing::error!("timer callback panicked: {}", e);
                    }
                }
            }
        });

        CancelHandle::new(move || token.cancel())
    }
}
