use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::descriptor::{NetworkId, PeerId, RequestId};

// EventBus
//
// Carries user-visible placement outcomes from the logic loop to whoever
// renders them (HUD, logs, tests). Handlers run synchronously on publish.

// Boxed event handler type
type BoxedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

// Generic event bus for type-safe event handling
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<TypeId, Vec<BoxedHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // Subscribe to a specific event type
    pub fn subscribe<T, F>(&self, handler: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        // Create a type-erased handler
        let boxed_handler: BoxedHandler = Arc::new(move |event: &dyn Any| {
            if let Some(specific_event) = event.downcast_ref::<T>() {
                handler(specific_event);
            }
        });

        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.entry(TypeId::of::<T>()).or_default().push(boxed_handler);
    }

    // Publish an event to all relevant handlers
    pub fn publish<T: Send + Sync + 'static>(&self, event: T) {
        // Clone the list so handlers may subscribe or publish re-entrantly
        let event_handlers = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.get(&TypeId::of::<T>()).cloned().unwrap_or_default()
        };

        for handler in event_handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count<T: 'static>(&self) -> usize {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }
}

// Placement event types

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPlaced {
    pub network_id: NetworkId,
    pub type_name: String,
    // Set when this peer's own pending commit was confirmed
    pub confirmed_request: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRemoved {
    pub network_id: NetworkId,
}

/// A recovered failure, phrased for the player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRejected {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityChanged {
    pub holder: Option<PeerId>,
    pub local_is_authority: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryReconciled {
    pub entries: usize,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipChanged {
    pub object_id: NetworkId,
    pub holder: Option<PeerId>,
}

#[cfg(test)]
mod event_bus_tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestEvent;

    #[derive(Debug, Clone)]
    struct DataEvent {
        data: String,
    }

    #[test]
    fn test_simple_event_subscription() {
        let event_bus = EventBus::new();
        let received = Arc::new(Mutex::new(false));
        let test_received = Arc::clone(&received);

        event_bus.subscribe(move |_: &TestEvent| {
            *test_received.lock().unwrap() = true;
        });
        event_bus.publish(TestEvent);

        assert!(*received.lock().unwrap());
    }

    #[test]
    fn test_multiple_subscribers() {
        let event_bus = EventBus::new();
        let received_count = Arc::new(Mutex::new(0));

        for _ in 0..3 {
            let count_clone = Arc::clone(&received_count);
            event_bus.subscribe(move |_: &TestEvent| {
                *count_clone.lock().unwrap() += 1;
            });
        }
        event_bus.publish(TestEvent);

        assert_eq!(*received_count.lock().unwrap(), 3);
        assert_eq!(event_bus.subscriber_count::<TestEvent>(), 3);
    }

    #[test]
    fn test_event_data_passing() {
        let event_bus = EventBus::new();
        let received_data = Arc::new(Mutex::new(None));
        let data_clone = Arc::clone(&received_data);

        event_bus.subscribe(move |event: &DataEvent| {
            *data_clone.lock().unwrap() = Some(event.data.clone());
        });
        event_bus.publish(DataEvent { data: "Test Data".to_string() });

        assert_eq!(*received_data.lock().unwrap(), Some("Test Data".to_string()));
    }

    #[test]
    fn test_events_are_routed_by_type() {
        let event_bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let hits_clone = Arc::clone(&hits);
        event_bus.subscribe(move |_: &DataEvent| {
            *hits_clone.lock().unwrap() += 1;
        });

        event_bus.publish(TestEvent);
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_no_subscribers_scenario() {
        let event_bus = EventBus::new();
        // Publishing event with no subscribers should not panic
        event_bus.publish(TestEvent);
    }
}
