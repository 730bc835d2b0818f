//! Event dispatcher
//!
//! Consumes the event bus and, for every event, evaluates the enabled
//! rules whose `Event` triggers match the event type and filter
//! constraints. Matching rules pass condition evaluation over the event
//! data before submission.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AutomationEngine, Trigger};
use crate::events::Event;

/// Whether an event trigger matches an event. The type pattern is an
/// exact match, `*` for everything, or a `prefix.*` wildcard; filters are
/// equality constraints over the event data.
pub(super) fn event_matches(trigger: &Trigger, event: &Event) -> bool {
    let Trigger::Event {
        event: pattern,
        filters,
    } = trigger
    else {
        return false;
    };

    if !type_matches(pattern, &event.event_type) {
        return false;
    }
    filters
        .iter()
        .all(|(key, value)| event.data.get(key) == Some(value))
}

fn type_matches(pattern: &str, actual: &str) -> bool {
    if pattern == "*" || pattern == actual {
        return true;
    }
    pattern
        .strip_suffix(".*")
        .map(|prefix| {
            actual
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        })
        .unwrap_or(false)
}

pub(super) async fn run(engine: AutomationEngine, mut shutdown: broadcast::Receiver<()>) {
    let mut events = engine.events().subscribe();
    info!("Starting event dispatcher");

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Event dispatcher lagged, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Event bus closed, stopping dispatcher");
                        break;
                    }
                };

                let rules = engine.snapshot();
                for rule in rules {
                    if !rule.enabled {
                        continue;
                    }
                    if !rule.triggers.iter().any(|t| event_matches(t, &event)) {
                        continue;
                    }

                    let mut context: HashMap<String, serde_json::Value> = event.data.clone();
                    context.insert("event_type".into(), serde_json::json!(event.event_type));
                    context.insert("event_id".into(), serde_json::json!(event.id));
                    context.insert("trigger".into(), serde_json::json!("event"));

                    match engine.conditions().evaluate_all(&rule.id, &rule.conditions, &context) {
                        Ok(true) => {
                            debug!(
                                rule_id = %rule.id,
                                event_type = %event.event_type,
                                "Event trigger fired"
                            );
                            engine.submit(rule, context, "event");
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(rule_id = %rule.id, error = %err, "Condition evaluation failed");
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down event dispatcher");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_types;

    fn event_trigger(pattern: &str, filters: &[(&str, serde_json::Value)]) -> Trigger {
        Trigger::Event {
            event: pattern.into(),
            filters: filters
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_exact_type_match() {
        let trigger = event_trigger(event_types::WORKLOAD_CREATED, &[]);
        let event = Event::new(event_types::WORKLOAD_CREATED, "test");
        assert!(event_matches(&trigger, &event));

        let other = Event::new(event_types::WORKLOAD_DELETED, "test");
        assert!(!event_matches(&trigger, &other));
    }

    #[test]
    fn test_wildcard_patterns() {
        let all = event_trigger("*", &[]);
        assert!(event_matches(&all, &Event::new(event_types::MANUAL, "test")));

        let prefixed = event_trigger("workload.*", &[]);
        assert!(event_matches(
            &prefixed,
            &Event::new(event_types::WORKLOAD_FAILED, "test")
        ));
        assert!(!event_matches(
            &prefixed,
            &Event::new(event_types::POLICY_CREATED, "test")
        ));
        // Prefix must be a full segment: "workload.*" must not match
        // "workloads.created"
        assert!(!event_matches(
            &prefixed,
            &Event::new("workloads.created", "test")
        ));
    }

    #[test]
    fn test_filters_are_equality_constraints() {
        let trigger = event_trigger(
            event_types::WORKLOAD_FAILED,
            &[("namespace", serde_json::json!("production"))],
        );

        let matching = Event::new(event_types::WORKLOAD_FAILED, "test")
            .with_data("namespace", serde_json::json!("production"));
        assert!(event_matches(&trigger, &matching));

        let wrong_value = Event::new(event_types::WORKLOAD_FAILED, "test")
            .with_data("namespace", serde_json::json!("staging"));
        assert!(!event_matches(&trigger, &wrong_value));

        let missing_field = Event::new(event_types::WORKLOAD_FAILED, "test");
        assert!(!event_matches(&trigger, &missing_field));
    }

    #[test]
    fn test_non_event_triggers_never_match() {
        let trigger = Trigger::Schedule {
            cron: None,
            interval_secs: Some(60),
        };
        assert!(!event_matches(
            &trigger,
            &Event::new(event_types::MANUAL, "test")
        ));
    }
}
