use parking_lot::Mutex;
use std::fmt;

type Teardown = Box<dyn FnOnce() + Send>;

/// A handle whose teardown runs at most once.
///
/// Used for event subscriptions and armed timers. `cancel()` may be called
/// any number of times from any thread; only the first call does anything.
pub struct CancelHandle {
    teardown: Mutex<Option<Teardown>>,
}

impl CancelHandle {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn cancel(&self) {
        // Take first so the teardown runs without the lock held.
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
