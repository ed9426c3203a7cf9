//! Event delivery from the network layer.
//!
//! Two streams are exposed: scan-results-available and
//! connectivity-state-changed. Subscribers get a [`Subscription`] whose
//! `cancel()` is idempotent. Events are neither filtered nor buffered here;
//! a handler only learns that something happened and queries the platform
//! for the details.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::handle::CancelHandle;

/// Callback invoked on every delivered event.
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle for one registered handler. Cancelling removes the handler.
pub type Subscription = CancelHandle;

/// Source of scan and connectivity events.
pub trait EventBus: Send + Sync {
    fn on_scan_results(&self, handler: EventHandler) -> Subscription;
    fn on_connectivity_changed(&self, handler: EventHandler) -> Subscription;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    ScanResults,
    Connectivity,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    scan: BTreeMap<u64, EventHandler>,
    connectivity: BTreeMap<u64, EventHandler>,
}

impl Registry {
    fn stream_mut(&mut self, stream: Stream) -> &mut BTreeMap<u64, EventHandler> {
        match stream {
            Stream::ScanResults => &mut self.scan,
            Stream::Connectivity => &mut self.connectivity,
        }
    }
}

/// In-process [`EventBus`]. Platform adapters publish into it; handlers run
/// on the publishing thread, in subscription order, without any bus lock held.
#[derive(Default)]
pub struct LocalEventBus {
    registry: Arc<Mutex<Registry>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_scan_results(&self) {
        self.publish(Stream::ScanResults);
    }

    pub fn publish_connectivity_changed(&self) {
        self.publish(Stream::Connectivity);
    }

    pub fn scan_subscriber_count(&self) -> usize {
        self.registry.lock().scan.len()
    }

    pub fn connectivity_subscriber_count(&self) -> usize {
        self.registry.lock().connectivity.len()
    }

    fn publish(&self, stream: Stream) {
        let handlers: Vec<EventHandler> = {
            let mut registry = self.registry.lock();
            registry.stream_mut(stream).values().cloned().collect()
        };
        trace!(?stream, handlers = handlers.len(), "publishing event");
        for handler in handlers {
            handler();
        }
    }

    fn subscribe(&self, stream: Stream, handler: EventHandler) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.stream_mut(stream).insert(id, handler);
            id
        };

        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        CancelHandle::new(move || {
            // The bus may already be gone; nothing left to remove then.
            if let Some(registry) = registry.upgrade() {
                registry.lock().stream_mut(stream).remove(&id);
            }
        })
    }
}

impl EventBus for LocalEventBus {
    fn on_scan_results(&self, handler: EventHandler) -> Subscription {
        self.subscribe(Stream::ScanResults, handler)
    }

    fn on_connectivity_changed(&self, handler: EventHandler) -> Subscription {
        self.subscribe(Stream::Connectivity, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, EventHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: EventHandler = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_streams_are_separate() {
        let bus = LocalEventBus::new();
        let (scans, on_scan) = counter();
        let (changes, on_change) = counter();
        let _s = bus.on_scan_results(on_scan);
        let _c = bus.on_connectivity_changed(on_change);

        bus.publish_scan_results();
        bus.publish_scan_results();
        bus.publish_connectivity_changed();

        assert_eq!(scans.load(Ordering::SeqCst), 2);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_stops_delivery() {
        let bus = LocalEventBus::new();
        let (count, handler) = counter();
        let sub = bus.on_scan_results(handler);

        bus.publish_scan_results();
        sub.cancel();
        sub.cancel();
        bus.publish_scan_results();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.scan_subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_only_removes_own_handler() {
        let bus = LocalEventBus::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        let sub1 = bus.on_connectivity_changed(h1);
        let _sub2 = bus.on_connectivity_changed(h2);

        sub1.cancel();
        bus.publish_connectivity_changed();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(bus.connectivity_subscriber_count(), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(LocalEventBus::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let sub = bus.on_scan_results(Arc::new(move || {
            if let Some(sub) = s.lock().take() {
                sub.cancel();
            }
        }));
        *slot.lock() = Some(sub);

        bus.publish_scan_results();
        assert_eq!(bus.scan_subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_after_bus_dropped() {
        let bus = LocalEventBus::new();
        let (_count, handler) = counter();
        let sub = bus.on_scan_results(handler);
        drop(bus);
        sub.cancel();
    }
}
