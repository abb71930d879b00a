//! Synchronous topic-to-subscriber event broadcast.
//!
//! Every event the engine produces in a tick is delivered to its
//! subscribers before the tick advances any further — there is no queueing
//! or async dispatch, matching the engine's single-cooperative-thread
//! design.

use crate::codec::Packet;
use crate::geometry::Point;

/// Events emitted by the engine over the course of a simulation.
#[derive(Debug, Clone)]
pub enum Event {
    PersonAdded { agent_id: String },
    PersonRemoved { agent_id: String },
    ConnectionFormed { link_id: String, a: String, b: String },
    ConnectionBroken { link_id: String, a: String, b: String },
    PacketTransmitted { link_id: String, from: String, to: String, packet: Packet },
    EnvironmentLoaded { building_count: usize },
    Reset,
    Tick { tick: u64, sim_time_ms: u64 },
}

impl Event {
    /// The topic name this event is published under, matching the
    /// naming (`person_added`, `connection_formed`, ...).
    pub fn topic(&self) -> &'static str {
        match self {
            Event::PersonAdded { .. } => "person_added",
            Event::PersonRemoved { .. } => "person_removed",
            Event::ConnectionFormed { .. } => "connection_formed",
            Event::ConnectionBroken { .. } => "connection_broken",
            Event::PacketTransmitted { .. } => "packet_transmitted",
            Event::EnvironmentLoaded { .. } => "environment_loaded",
            Event::Reset => "reset",
            Event::Tick { .. } => "tick",
        }
    }
}

/// A subscriber callback. Boxed so the bus can hold a heterogeneous list
/// of closures/objects.
pub type Subscriber = Box<dyn FnMut(&Event) + Send>;

/// Synchronous event bus: `publish` calls every subscriber in registration
/// order before returning, so event ordering within a tick is exactly the
/// order `publish` was called.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus { subscribers: Vec::new() }
    }

    /// Register a subscriber that receives every published event,
    /// regardless of topic. Callers wanting topic filtering can match on
    /// `Event::topic()` inside their callback.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    /// Deliver `event` to every subscriber, in registration order.
    pub fn publish(&mut self, event: Event) {
        for subscriber in &mut self.subscribers {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscribers", &self.subscribers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn subscribers_receive_events_in_publish_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let log_clone = log.clone();
        bus.subscribe(move |event: &Event| {
            log_clone.lock().unwrap().push(event.topic().to_string());
        });

        bus.publish(Event::Reset);
        bus.publish(Event::Tick { tick: 1, sim_time_ms: 100 });

        let recorded = log.lock().unwrap();
        assert_eq!(*recorded, vec!["reset".to_string(), "tick".to_string()]);
    }

    #[test]
    fn multiple_subscribers_all_receive_the_same_event() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        for _ in 0..3 {
            let count_clone = count.clone();
            bus.subscribe(move |_event: &Event| {
                *count_clone.lock().unwrap() += 1;
            });
        }
        bus.publish(Event::Reset);
        assert_eq!(*count.lock().unwrap(), 3);
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[test]
    fn topic_names_match_spec_naming() {
        assert_eq!(Event::Reset.topic(), "reset");
        assert_eq!(Event::PersonAdded { agent_id: "a".into() }.topic(), "person_added");
        assert_eq!(Event::EnvironmentLoaded { building_count: 0 }.topic(), "environment_loaded");
    }
}
