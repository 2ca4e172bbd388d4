//! Event bus for the Firebase bridge
//!
//! Events received from Home Assistant are fired here and handed to
//! synchronous listeners registered with [`EventBus::listen`]. Listeners
//! run inline on the firing thread in registration order; anything slow
//! must be handed off to a task by the listener itself.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifies a synchronous listener so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Callback type for synchronous listeners
pub type EventHandler = Arc<dyn Fn(&Event<serde_json::Value>) + Send + Sync>;

struct Listener {
    id: ListenerId,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    /// Listeners per event type; `*` listeners live under the match-all key
    listeners: DashMap<EventType, Vec<Listener>>,
    next_listener_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler for an event type (`*` for all)
    ///
    /// The handler runs inside [`EventBus::fire`]. It must not block.
    pub fn listen<F>(&self, event_type: impl Into<EventType>, handler: F) -> ListenerId
    where
        F: Fn(&Event<serde_json::Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        debug!(event_type = %event_type, listener = id.0, "Registering listener");

        self.listeners.entry(event_type).or_default().push(Listener {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a synchronous listener; returns false if it was unknown
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|l| l.id != id);
            removed |= before != entry.len();
        }
        self.listeners.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Number of registered synchronous listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.len()).sum()
    }

    /// Call every listener for the event's type and every `*` listener
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        let mut matching: Vec<(ListenerId, EventHandler)> = Vec::new();
        for key in [event.event_type.clone(), EventType::match_all()] {
            if let Some(listeners) = self.listeners.get(&key) {
                matching.extend(listeners.iter().map(|l| (l.id, l.handler.clone())));
            }
        }
        if matching.is_empty() {
            trace!(event_type = %event.event_type, "No listeners");
            return;
        }
        matching.sort_by_key(|(id, _)| *id);
        matching.dedup_by_key(|(id, _)| *id);

        // No shard is locked here, so handlers may (un)register listeners.
        for (_, handler) in matching {
            handler(&event);
        }
    }

    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event =
            Event::typed(data, context).map(|d| serde_json::to_value(&d).unwrap_or_default());
        self.fire(event);
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::StateChangedData;
    use ha_core::{EntityId, State};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_fire_typed_reaches_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.listen("state_changed", move |e| {
            let data: StateChangedData = serde_json::from_value(e.data.clone()).unwrap();
            s.lock().unwrap().push(data);
        });

        let entity_id = EntityId::new("light", "kitchen").unwrap();
        let new_state = State::new(entity_id.clone(), "on", HashMap::new(), Context::new());
        bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(new_state),
            },
            Context::new(),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].entity_id.to_string(), "light.kitchen");
        assert_eq!(seen[0].new_state.as_ref().unwrap().state, "on");
    }

    #[test]
    fn test_listeners_run_inline_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.listen("ping", move |e| {
            s.lock().unwrap().push(format!("first:{}", e.data["n"]))
        });
        let s = seen.clone();
        bus.listen(EventType::match_all(), move |e| {
            s.lock().unwrap().push(format!("all:{}", e.data["n"]))
        });
        let s = seen.clone();
        bus.listen("ping", move |e| {
            s.lock().unwrap().push(format!("third:{}", e.data["n"]))
        });

        bus.fire(Event::new("ping", json!({"n": 1}), Context::new()));

        assert_eq!(*seen.lock().unwrap(), vec!["first:1", "all:1", "third:1"]);
    }

    #[test]
    fn test_listener_type_filtering() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let all = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        bus.listen("a", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = all.clone();
        bus.listen(EventType::match_all(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.fire(Event::new("a", json!({}), Context::new()));
        bus.fire(Event::new("b", json!({}), Context::new()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = bus.listen("a", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count(), 1);

        bus.fire(Event::new("a", json!({}), Context::new()));
        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        bus.fire(Event::new("a", json!({}), Context::new()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let (b, c, own) = (bus.clone(), count.clone(), own_id.clone());
        let id = bus.listen("once", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = own.lock().unwrap().take() {
                b.remove_listener(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        bus.fire(Event::new("once", json!({}), Context::new()));
        bus.fire(Event::new("once", json!({}), Context::new()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }
}
