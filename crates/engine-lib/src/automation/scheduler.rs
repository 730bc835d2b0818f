//! Schedule trigger scheduler
//!
//! Maintains next-fire times for every cron/interval trigger, sleeps until
//! the earliest deadline and resubmits fired rules. A wall-clock step-back
//! can never cause a re-fire: the next fire time is always computed from
//! `max(now_after_wake, scheduled_time)`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{cron::CronSchedule, AutomationEngine, Trigger};

/// Next fire time of a schedule trigger strictly after `after`
pub(super) fn next_fire(trigger: &Trigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Schedule {
            cron: Some(expression),
            ..
        } => CronSchedule::parse(expression).ok()?.next_after(after),
        Trigger::Schedule {
            cron: None,
            interval_secs: Some(secs),
        } => Some(after + chrono::Duration::seconds(*secs as i64)),
        _ => None,
    }
}

type FireKey = (String, usize);

/// Reconcile the due-time table with the current rule snapshot: new
/// triggers get a first fire time, removed or disabled rules drop out.
fn reconcile(
    due: &mut HashMap<FireKey, DateTime<Utc>>,
    rules: &[Arc<super::AutomationRule>],
    now: DateTime<Utc>,
) {
    let mut live: std::collections::HashSet<FireKey> = std::collections::HashSet::new();
    for rule in rules {
        if !rule.enabled {
            continue;
        }
        for (index, trigger) in rule.triggers.iter().enumerate() {
            if !matches!(trigger, Trigger::Schedule { .. }) {
                continue;
            }
            let key = (rule.id.clone(), index);
            live.insert(key.clone());
            if !due.contains_key(&key) {
                if let Some(at) = next_fire(trigger, now) {
                    due.insert(key, at);
                }
            }
        }
    }
    due.retain(|key, _| live.contains(key));
}

pub(super) async fn run(engine: AutomationEngine, mut shutdown: broadcast::Receiver<()>) {
    info!("Starting automation scheduler");
    let mut due: HashMap<FireKey, DateTime<Utc>> = HashMap::new();

    loop {
        let rules = engine.snapshot();
        let now = Utc::now();
        reconcile(&mut due, &rules, now);

        // Surface the per-rule earliest fire time in rule status
        for rule in &rules {
            let earliest = due
                .iter()
                .filter(|((id, _), _)| id == &rule.id)
                .map(|(_, at)| *at)
                .min();
            engine.set_next_execution(&rule.id, earliest);
        }

        let earliest = due.values().min().copied();
        let sleep = earliest
            .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
            .unwrap_or(std::time::Duration::from_secs(3600));

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {
                let now_after_wake = Utc::now();
                let fired: Vec<FireKey> = due
                    .iter()
                    .filter(|(_, at)| **at <= now_after_wake)
                    .map(|(key, _)| key.clone())
                    .collect();

                for key in fired {
                    let Some(rule) = rules.iter().find(|r| r.id == key.0) else {
                        due.remove(&key);
                        continue;
                    };
                    let trigger = &rule.triggers[key.1];

                    let mut context: HashMap<String, serde_json::Value> = HashMap::new();
                    context.insert("trigger".into(), serde_json::json!("schedule"));
                    context.insert("rule_id".into(), serde_json::json!(rule.id));
                    context.insert(
                        "scheduled_at".into(),
                        serde_json::json!(due[&key].to_rfc3339()),
                    );

                    match engine.conditions().evaluate_all(&rule.id, &rule.conditions, &context) {
                        Ok(true) => {
                            debug!(rule_id = %rule.id, "Schedule trigger fired");
                            engine.submit(rule.clone(), context, "schedule");
                        }
                        Ok(false) => {
                            debug!(rule_id = %rule.id, "Conditions rejected scheduled firing");
                        }
                        Err(err) => {
                            warn!(rule_id = %rule.id, error = %err, "Condition evaluation failed");
                        }
                    }

                    // Step-back guard: never compute the next fire from a
                    // clock earlier than the wake-up observation
                    let base = now_after_wake.max(due[&key]);
                    match next_fire(trigger, base) {
                        Some(next) => {
                            due.insert(key, next.max(now_after_wake));
                        }
                        None => {
                            due.remove(&key);
                        }
                    }
                }
            }
            _ = engine.rules_changed().notified() => {
                // Re-snapshot and reconcile on the next loop pass
            }
            _ = shutdown.recv() => {
                info!("Shutting down automation scheduler");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ActionTemplate, AutomationRule};
    use chrono::TimeZone;

    fn schedule_rule(id: &str, cron: Option<&str>, interval_secs: Option<u64>) -> Arc<AutomationRule> {
        Arc::new(AutomationRule {
            id: id.into(),
            name: format!("rule-{id}"),
            description: None,
            enabled: true,
            priority: 100,
            triggers: vec![Trigger::Schedule {
                cron: cron.map(str::to_string),
                interval_secs,
            }],
            conditions: vec![],
            actions: vec![ActionTemplate {
                action_type: "notify".into(),
                target: Some("ops".into()),
                parameters: HashMap::new(),
                timeout_secs: None,
                retry: None,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn test_interval_next_fire() {
        let trigger = Trigger::Schedule {
            cron: None,
            interval_secs: Some(60),
        };
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            next_fire(&trigger, now).unwrap(),
            now + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_cron_next_fire() {
        let trigger = Trigger::Schedule {
            cron: Some("0 * * * *".into()),
            interval_secs: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let next = next_fire(&trigger, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_event_trigger_has_no_fire_time() {
        let trigger = Trigger::Event {
            event: "workload.created".into(),
            filters: HashMap::new(),
        };
        assert!(next_fire(&trigger, Utc::now()).is_none());
    }

    #[test]
    fn test_reconcile_adds_and_removes() {
        let mut due = HashMap::new();
        let now = Utc::now();
        let rule = schedule_rule("r1", None, Some(60));
        reconcile(&mut due, &[rule.clone()], now);
        assert_eq!(due.len(), 1);

        // Disabled rule drops out
        let mut disabled = (*rule).clone();
        disabled.enabled = false;
        reconcile(&mut due, &[Arc::new(disabled)], now);
        assert!(due.is_empty());
    }

    #[test]
    fn test_reconcile_keeps_existing_deadline() {
        let mut due = HashMap::new();
        let now = Utc::now();
        let rule = schedule_rule("r1", None, Some(60));
        reconcile(&mut due, &[rule.clone()], now);
        let first = due[&("r1".to_string(), 0)];

        // A later reconcile must not push the deadline out
        reconcile(&mut due, &[rule], now + chrono::Duration::seconds(30));
        assert_eq!(due[&("r1".to_string(), 0)], first);
    }

    #[test]
    fn test_step_back_guard() {
        // Clock stepped back between scheduling and waking: the recomputed
        // next fire must not be earlier than the wake observation
        let scheduled = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let now_after_wake = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 30).unwrap();
        let trigger = Trigger::Schedule {
            cron: None,
            interval_secs: Some(10),
        };

        let base = now_after_wake.max(scheduled);
        let next = next_fire(&trigger, base).unwrap().max(now_after_wake);
        assert!(next >= now_after_wake);
        assert_eq!(next, now_after_wake + chrono::Duration::seconds(10));
    }
}
