use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EventIdPolicy;

/// One doorbell press as written by the device.
///
/// Every field defaults so partially written records still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoorbellEvent {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, rename = "device_id")]
    pub device_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub location: String,
}

impl DoorbellEvent {
    /// `{timestamp}_{time}_{date}`. Collides for presses that share all three.
    pub fn composite_id(&self) -> String {
        format!("{}_{}_{}", self.timestamp, self.time, self.date)
    }
}

/// An event together with the store key it lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedEvent {
    pub key: String,
    pub event: DoorbellEvent,
}

impl KeyedEvent {
    pub fn new(key: impl Into<String>, event: DoorbellEvent) -> Self {
        Self {
            key: key.into(),
            event,
        }
    }

    pub fn event_id(&self, policy: EventIdPolicy) -> String {
        match policy {
            EventIdPolicy::StoreKey if !self.key.is_empty() => self.key.clone(),
            _ => self.event.composite_id(),
        }
    }

    /// Newest first: higher timestamp, then higher store key.
    pub fn newest_first(a: &KeyedEvent, b: &KeyedEvent) -> Ordering {
        b.event
            .timestamp
            .cmp(&a.event.timestamp)
            .then_with(|| b.key.cmp(&a.key))
    }
}

/// Parses the children of an events node.
///
/// Returns the events that deserialized plus the keys that did not.
pub fn parse_event_children(node: Option<&Value>) -> (Vec<KeyedEvent>, Vec<String>) {
    let Some(Value::Object(children)) = node else {
        return (Vec::new(), Vec::new());
    };

    let mut events = Vec::with_capacity(children.len());
    let mut rejected = Vec::new();
    for (key, child) in children {
        match serde_json::from_value::<DoorbellEvent>(child.clone()) {
            Ok(event) if child.is_object() => events.push(KeyedEvent::new(key.clone(), event)),
            _ => rejected.push(key.clone()),
        }
    }
    (events, rejected)
}

/// The event with the maximum timestamp; ties go to the highest store key.
pub fn latest_event(events: &[KeyedEvent]) -> Option<&KeyedEvent> {
    events.iter().min_by(|a, b| KeyedEvent::newest_first(a, b))
}
