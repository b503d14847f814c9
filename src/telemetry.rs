//! Telemetry bus
//!
//! Append-only, ordered log of protocol and simulation events. Observers
//! register under a tag and get back a [`Subscription`] that detaches on drop,
//! so tearing down a view can never leave a stale handler behind. Registering
//! a tag that is already in use replaces the previous handler.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telemetry entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Verifiable protocol evidence (transaction refs, correlation ids, seeds)
    Proof,
    Event,
    Warn,
}

/// Which writer appended the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Protocol,
    Simulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Emission order, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub kind: EventKind,
    pub message: String,
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:?}/{:?}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.source,
            self.kind,
            self.message
        )
    }
}

type Handler = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

struct Observer {
    id: u64,
    tag: String,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    events: Vec<TelemetryEvent>,
    observers: Vec<Observer>,
    next_observer_id: u64,
}

impl Inner {
    fn attach(&mut self, tag: &str, once: bool, handler: Handler) -> u64 {
        self.next_observer_id += 1;
        let id = self.next_observer_id;
        if self.observers.iter().any(|o| o.tag == tag) {
            log::debug!("Replacing telemetry observer '{}'", tag);
            self.observers.retain(|o| o.tag != tag);
        }
        self.observers.push(Observer {
            id,
            tag: tag.to_owned(),
            once,
            handler,
        });
        id
    }

    fn recent(&self, n: usize) -> Vec<TelemetryEvent> {
        self.events.iter().rev().take(n).cloned().collect()
    }
}

/// Shared, cloneable handle to the event log
#[derive(Clone, Default)]
pub struct TelemetryBus {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for TelemetryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("TelemetryBus")
            .field("events", &inner.events.len())
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and deliver it to observers. Handlers run after the
    /// log lock is released, so they may publish or subscribe themselves.
    pub fn publish(
        &self,
        source: EventSource,
        kind: EventKind,
        message: impl Into<String>,
    ) -> TelemetryEvent {
        let (event, handlers) = {
            let mut inner = self.lock();
            let event = TelemetryEvent {
                seq: inner.events.len() as u64,
                timestamp: Utc::now(),
                source,
                kind,
                message: message.into(),
            };
            inner.events.push(event.clone());
            let handlers: Vec<Handler> =
                inner.observers.iter().map(|o| Arc::clone(&o.handler)).collect();
            inner.observers.retain(|o| !o.once);
            (event, handlers)
        };

        match kind {
            EventKind::Warn => log::warn!("{:?}: {}", source, event.message),
            _ => log::debug!("{:?}/{:?}: {}", source, kind, event.message),
        }

        for handler in handlers {
            handler(&event);
        }
        event
    }

    /// Register a persistent observer
    pub fn subscribe<F>(&self, tag: &str, handler: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        let id = self.lock().attach(tag, false, Arc::new(handler));
        self.subscription(id)
    }

    /// Register an observer removed after its first delivery
    pub fn subscribe_once<F>(&self, tag: &str, handler: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        let id = self.lock().attach(tag, true, Arc::new(handler));
        self.subscription(id)
    }

    /// Remove the observer registered under `tag`. Returns false if none was.
    pub fn unsubscribe(&self, tag: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|o| o.tag != tag);
        inner.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Full log in emission order
    pub fn history(&self) -> Vec<TelemetryEvent> {
        self.lock().events.clone()
    }

    /// The `n` most recent events, most recent first
    pub fn recent(&self, n: usize) -> Vec<TelemetryEvent> {
        self.lock().recent(n)
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscription(&self, id: u64) -> Subscription {
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }
}

/// Scoped observer registration; detaches on drop
#[must_use = "dropping a Subscription detaches the observer"]
pub struct Subscription {
    bus: Weak<Mutex<Inner>>,
    id: u64,
}

impl Subscription {
    /// Whether the observer is still registered (one-shot observers detach
    /// after delivery, tagged ones when replaced)
    pub fn is_active(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.observers.iter().any(|o| o.id == self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.observers.retain(|o| o.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Bounded, most-recent-first window over the bus for display
#[derive(Debug)]
pub struct TelemetryView {
    window: usize,
    entries: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    _subscription: Subscription,
}

impl TelemetryView {
    /// Mount a view. The initial snapshot and the live subscription are taken
    /// under one lock so no event falls between them.
    pub fn mount(bus: &TelemetryBus, tag: &str, window: usize) -> Self {
        let entries = Arc::new(Mutex::new(VecDeque::with_capacity(window)));
        let sink = Arc::clone(&entries);
        let handler: Handler = Arc::new(move |event: &TelemetryEvent| {
            let mut entries = sink.lock().unwrap_or_else(PoisonError::into_inner);
            insert_by_seq(&mut entries, event, window);
        });

        let id = {
            let mut inner = bus.lock();
            let snapshot = inner.recent(window);
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(snapshot);
            inner.attach(tag, false, handler)
        };

        Self {
            window,
            entries,
            _subscription: bus.subscription(id),
        }
    }

    /// Displayed entries, most recent first
    pub fn entries(&self) -> Vec<TelemetryEvent> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

/// Keep `entries` sorted by descending `seq` no matter the delivery order.
/// Writers on different threads can deliver out of emission order.
fn insert_by_seq(entries: &mut VecDeque<TelemetryEvent>, event: &TelemetryEvent, window: usize) {
    let at = entries.partition_point(|e| e.seq > event.seq);
    if entries.get(at).is_some_and(|e| e.seq == event.seq) {
        return;
    }
    entries.insert(at, event.clone());
    entries.truncate(window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&TelemetryEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &TelemetryEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn messages(events: &[TelemetryEvent]) -> Vec<&str> {
        events.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_history_in_emission_order() {
        let bus = TelemetryBus::new();
        bus.publish(EventSource::Protocol, EventKind::Event, "a");
        bus.publish(EventSource::Simulation, EventKind::Proof, "b");
        bus.publish(EventSource::Protocol, EventKind::Warn, "c");
        let history = bus.history();
        assert_eq!(messages(&history), ["a", "b", "c"]);
        assert_eq!(history.iter().map(|e| e.seq).collect::<Vec<_>>(), [0, 1, 2]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_recent_is_most_recent_first() {
        let bus = TelemetryBus::new();
        for n in 0..5 {
            bus.publish(EventSource::Simulation, EventKind::Event, n.to_string());
        }
        assert_eq!(messages(&bus.recent(3)), ["4", "3", "2"]);
        assert_eq!(bus.recent(50).len(), 5);
    }

    #[test]
    fn test_once_observer_fires_once() {
        let bus = TelemetryBus::new();
        let (count, handler) = counter();
        let sub = bus.subscribe_once("result", handler);
        assert!(sub.is_active());
        bus.publish(EventSource::Simulation, EventKind::Event, "ended");
        bus.publish(EventSource::Simulation, EventKind::Event, "again");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_resubscribing_a_tag_replaces_the_handler() {
        let bus = TelemetryBus::new();
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();
        let old = bus.subscribe("hud", first_handler);
        let _new = bus.subscribe("hud", second_handler);
        assert_eq!(bus.observer_count(), 1);
        assert!(!old.is_active());

        bus.publish(EventSource::Simulation, EventKind::Event, "tick");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // Dropping the replaced handle must not detach its successor
        drop(old);
        assert_eq!(bus.observer_count(), 1);
    }

    #[test]
    fn test_unsubscribe_by_tag_and_drop() {
        let bus = TelemetryBus::new();
        let (count, handler) = counter();
        let _sub = bus.subscribe("log", handler);
        assert!(bus.unsubscribe("log"));
        assert!(!bus.unsubscribe("log"));
        bus.publish(EventSource::Protocol, EventKind::Event, "x");
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (count, handler) = counter();
        let sub = bus.subscribe("scoped", handler);
        drop(sub);
        bus.publish(EventSource::Protocol, EventKind::Event, "y");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_handler_may_publish() {
        let bus = TelemetryBus::new();
        let echo = bus.clone();
        let _sub = bus.subscribe_once("echo", move |event| {
            let reply = format!("re: {}", event.message);
            echo.publish(EventSource::Simulation, EventKind::Event, reply);
        });
        bus.publish(EventSource::Protocol, EventKind::Event, "ping");
        assert_eq!(messages(&bus.history()), ["ping", "re: ping"]);
    }

    #[test]
    fn test_view_mount_is_bounded() {
        let bus = TelemetryBus::new();
        for n in 0..25 {
            bus.publish(EventSource::Protocol, EventKind::Event, n.to_string());
        }
        let view = TelemetryView::mount(&bus, "panel", 10);
        let entries = view.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].message, "24");
        assert_eq!(entries[9].message, "15");

        bus.publish(EventSource::Simulation, EventKind::Warn, "live");
        let entries = view.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].message, "live");
        assert_eq!(entries[9].message, "16");

        drop(view);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_view_orders_by_emission_across_threads() {
        let bus = TelemetryBus::new();
        // Stall delivery of "first" until "second" has been delivered
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let _slow = bus.subscribe("slow", move |event| {
            if event.message == "first" {
                let _ = entered_tx.send(());
                let _ = release_rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
            }
        });
        let view = TelemetryView::mount(&bus, "panel", 10);

        let writer = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                bus.publish(EventSource::Protocol, EventKind::Proof, "first");
            })
        };
        entered_rx.recv().expect("first is being delivered");
        bus.publish(EventSource::Simulation, EventKind::Event, "second");
        release_tx.send(()).expect("release slow observer");
        writer.join().expect("writer thread");

        let entries = view.entries();
        assert_eq!(messages(&entries), ["second", "first"]);
        assert!(entries.windows(2).all(|w| w[0].seq > w[1].seq));
    }

    #[test]
    fn test_view_ignores_duplicate_and_stale_entries() {
        let bus = TelemetryBus::new();
        let view = TelemetryView::mount(&bus, "panel", 2);
        let events: Vec<TelemetryEvent> = (0..3)
            .map(|n| bus.publish(EventSource::Simulation, EventKind::Event, n.to_string()))
            .collect();

        let mut entries = VecDeque::new();
        insert_by_seq(&mut entries, &events[2], 2);
        insert_by_seq(&mut entries, &events[0], 2);
        insert_by_seq(&mut entries, &events[1], 2);
        insert_by_seq(&mut entries, &events[1], 2);
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, [2, 1]);
        assert_eq!(messages(&view.entries()), ["2", "1"]);
    }

    #[test]
    fn test_event_serializes_lowercase_kind() {
        let bus = TelemetryBus::new();
        let event = bus.publish(EventSource::Protocol, EventKind::Proof, "tx 0xabc");
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"kind\":\"proof\""));
        assert!(json.contains("\"source\":\"protocol\""));
    }
}
