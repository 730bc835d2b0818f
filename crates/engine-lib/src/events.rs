//! Typed event bus
//!
//! Broadcast-based pub/sub for workload, policy and decision lifecycle
//! events. Subscribers receive every published event and filter by type;
//! slow subscribers that fall behind the channel capacity lose oldest
//! events rather than blocking publishers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Well-known event types
pub mod event_types {
    pub const WORKLOAD_CREATED: &str = "workload.created";
    pub const WORKLOAD_UPDATED: &str = "workload.updated";
    pub const WORKLOAD_DELETED: &str = "workload.deleted";
    pub const WORKLOAD_COMPLETED: &str = "workload.completed";
    pub const WORKLOAD_FAILED: &str = "workload.failed";

    pub const POLICY_CREATED: &str = "policy.created";
    pub const POLICY_UPDATED: &str = "policy.updated";
    pub const POLICY_DELETED: &str = "policy.deleted";

    pub const DECISION_CREATED: &str = "decision.created";
    pub const DECISION_COMPLETED: &str = "decision.completed";
    pub const DECISION_FAILED: &str = "decision.failed";

    pub const SCHEDULE: &str = "schedule";
    pub const MANUAL: &str = "manual";
}

/// An event on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            data: HashMap::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Event bus handle; clones share the same channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of live subscribers; an event
    /// with no subscribers is dropped silently.
    pub fn publish(&self, event: Event) -> usize {
        debug!(event_type = %event.event_type, event_id = %event.id, "Publishing event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe to a subset of event types; other events are skipped
    /// inside [`FilteredSubscription::recv`].
    pub fn subscribe_to(&self, event_types: &[&str]) -> FilteredSubscription {
        FilteredSubscription {
            receiver: self.sender.subscribe(),
            event_types: event_types.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A subscription that only yields the requested event types
pub struct FilteredSubscription {
    receiver: broadcast::Receiver<Event>,
    event_types: Vec<String>,
}

impl FilteredSubscription {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.event_types.iter().any(|t| t == &event.event_type) {
                return Ok(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(
            Event::new(event_types::WORKLOAD_CREATED, "test")
                .with_data("workload_id", serde_json::json!("w1")),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, event_types::WORKLOAD_CREATED);
        assert_eq!(event.data["workload_id"], serde_json::json!("w1"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(Event::new(event_types::MANUAL, "test")), 0);
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_other_types() {
        let bus = EventBus::new(16);
        let mut subscription = bus.subscribe_to(&[event_types::WORKLOAD_FAILED]);

        bus.publish(Event::new(event_types::WORKLOAD_CREATED, "test"));
        bus.publish(Event::new(event_types::WORKLOAD_FAILED, "test"));

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.event_type, event_types::WORKLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_every_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::new(event_types::POLICY_CREATED, "test"));

        assert_eq!(rx1.recv().await.unwrap().event_type, event_types::POLICY_CREATED);
        assert_eq!(rx2.recv().await.unwrap().event_type, event_types::POLICY_CREATED);
    }
}
