//! Threshold monitor
//!
//! Polls a metrics source on a fixed cadence and evaluates `Threshold`
//! triggers. A threshold is *firing* once its condition has held for
//! enough consecutive polls to cover its duration
//! (`consecutive_polls × cadence ≥ duration`); the rule is submitted only
//! on the not-firing → firing edge, so a sustained breach fires exactly
//! once until it clears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AutomationEngine, AutomationRule, ConditionOperator, Trigger};
use crate::errors::Result;

/// Source of named metric samples for threshold evaluation
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<HashMap<String, f64>>;
}

/// Fixed in-memory metrics, useful as a default and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticMetricsSource {
    values: Arc<std::sync::RwLock<HashMap<String, f64>>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metric: impl Into<String>, value: f64) {
        if let Ok(mut values) = self.values.write() {
            values.insert(metric.into(), value);
        }
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn sample(&self) -> Result<HashMap<String, f64>> {
        Ok(self
            .values
            .read()
            .map(|values| values.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct TrackerState {
    consecutive_true: u32,
    firing: bool,
}

/// Per-(rule, trigger) consecutive-poll tracking
pub(super) struct ThresholdTracker {
    cadence: Duration,
    states: DashMap<(String, usize), TrackerState>,
}

impl ThresholdTracker {
    pub(super) fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            states: DashMap::new(),
        }
    }

    /// Feed one poll's samples through every threshold trigger of the
    /// given rules; returns the rules that crossed onto the firing edge.
    pub(super) fn observe(
        &self,
        rules: &[Arc<AutomationRule>],
        samples: &HashMap<String, f64>,
    ) -> Vec<Arc<AutomationRule>> {
        let mut fired = Vec::new();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            for (index, trigger) in rule.triggers.iter().enumerate() {
                let Trigger::Threshold {
                    metric,
                    operator,
                    value,
                    duration_secs,
                } = trigger
                else {
                    continue;
                };

                let Some(sample) = samples.get(metric) else {
                    debug!(rule_id = %rule.id, metric = %metric, "Metric absent from sample");
                    continue;
                };

                let holds = compare(*operator, *sample, *value);
                let key = (rule.id.clone(), index);
                let mut state = self.states.entry(key).or_default();

                if !holds {
                    state.consecutive_true = 0;
                    state.firing = false;
                    continue;
                }

                state.consecutive_true += 1;
                let held = self.cadence.as_secs() * state.consecutive_true as u64;
                let required = duration_secs.unwrap_or(0);
                let now_firing = held >= required;

                if now_firing && !state.firing {
                    state.firing = true;
                    info!(
                        rule_id = %rule.id,
                        metric = %metric,
                        sample = sample,
                        polls = state.consecutive_true,
                        "Threshold trigger firing"
                    );
                    fired.push(rule.clone());
                } else {
                    state.firing = now_firing;
                }
            }
        }
        fired
    }
}

fn compare(operator: ConditionOperator, sample: f64, threshold: f64) -> bool {
    match operator {
        ConditionOperator::GreaterThan => sample > threshold,
        ConditionOperator::LessThan => sample < threshold,
        ConditionOperator::GreaterThanOrEqual => sample >= threshold,
        ConditionOperator::LessThanOrEqual => sample <= threshold,
        ConditionOperator::Equals => (sample - threshold).abs() < f64::EPSILON,
        ConditionOperator::NotEquals => (sample - threshold).abs() >= f64::EPSILON,
        // String operators never hold for numeric samples
        _ => false,
    }
}

/// Monitor loop: poll, track, submit fired rules
pub(super) async fn run(engine: AutomationEngine, mut shutdown: broadcast::Receiver<()>) {
    let cadence = engine.config().monitor_interval;
    let tracker = ThresholdTracker::new(cadence);
    let mut ticker = tokio::time::interval(cadence);
    info!(cadence_secs = cadence.as_secs(), "Starting threshold monitor");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let samples = match engine.metrics_source().sample().await {
                    Ok(samples) => samples,
                    Err(err) => {
                        warn!(error = %err, "Metric sampling failed, skipping poll");
                        continue;
                    }
                };

                let rules = engine.snapshot();
                for rule in tracker.observe(&rules, &samples) {
                    let mut context: HashMap<String, serde_json::Value> = samples
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                        .collect();
                    context.insert("trigger".into(), serde_json::json!("threshold"));

                    match engine.conditions().evaluate_all(&rule.id, &rule.conditions, &context) {
                        Ok(true) => engine.submit(rule, context, "threshold"),
                        Ok(false) => {
                            debug!(rule_id = %rule.id, "Conditions rejected threshold firing");
                        }
                        Err(err) => {
                            warn!(rule_id = %rule.id, error = %err, "Condition evaluation failed");
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down threshold monitor");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn threshold_rule(
        id: &str,
        metric: &str,
        operator: ConditionOperator,
        value: f64,
        duration_secs: Option<u64>,
    ) -> Arc<AutomationRule> {
        Arc::new(AutomationRule {
            id: id.into(),
            name: format!("rule-{id}"),
            description: None,
            enabled: true,
            priority: 100,
            triggers: vec![Trigger::Threshold {
                metric: metric.into(),
                operator,
                value,
                duration_secs,
            }],
            conditions: vec![],
            actions: vec![super::super::ActionTemplate {
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

    fn samples(metric: &str, value: f64) -> HashMap<String, f64> {
        HashMap::from([(metric.to_string(), value)])
    }

    #[test]
    fn test_fires_exactly_on_poll_covering_duration() {
        // cpu > 80 for 5m at 30s cadence: polls 1-9 hold 4m30s, poll 10
        // reaches 5m and fires exactly once
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let rules = vec![threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            Some(300),
        )];

        for poll in 1..=9 {
            let fired = tracker.observe(&rules, &samples("cpu", 90.0));
            assert!(fired.is_empty(), "fired early on poll {poll}");
        }
        let fired = tracker.observe(&rules, &samples("cpu", 90.0));
        assert_eq!(fired.len(), 1, "poll 10 covers the 5m duration");

        // Sustained breach does not refire
        for _ in 0..5 {
            assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
        }
    }

    #[test]
    fn test_breach_interruption_resets_accumulation() {
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let rules = vec![threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            Some(90),
        )];

        assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
        assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
        // Dip below resets the streak
        assert!(tracker.observe(&rules, &samples("cpu", 50.0)).is_empty());
        assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
        assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
        // Third consecutive poll covers 90s
        assert_eq!(tracker.observe(&rules, &samples("cpu", 90.0)).len(), 1);
    }

    #[test]
    fn test_no_duration_fires_on_first_breach() {
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let rules = vec![threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            None,
        )];
        assert_eq!(tracker.observe(&rules, &samples("cpu", 90.0)).len(), 1);
        assert!(tracker.observe(&rules, &samples("cpu", 90.0)).is_empty());
    }

    #[test]
    fn test_refires_after_clear_and_new_breach() {
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let rules = vec![threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            None,
        )];
        assert_eq!(tracker.observe(&rules, &samples("cpu", 90.0)).len(), 1);
        assert!(tracker.observe(&rules, &samples("cpu", 50.0)).is_empty());
        assert_eq!(tracker.observe(&rules, &samples("cpu", 95.0)).len(), 1);
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let mut rule = (*threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            None,
        ))
        .clone();
        rule.enabled = false;
        assert!(tracker
            .observe(&[Arc::new(rule)], &samples("cpu", 90.0))
            .is_empty());
    }

    #[test]
    fn test_absent_metric_is_skipped() {
        let tracker = ThresholdTracker::new(Duration::from_secs(30));
        let rules = vec![threshold_rule(
            "r1",
            "cpu",
            ConditionOperator::GreaterThan,
            80.0,
            None,
        )];
        assert!(tracker.observe(&rules, &samples("memory", 99.0)).is_empty());
    }

    #[tokio::test]
    async fn test_static_metrics_source() {
        let source = StaticMetricsSource::new();
        source.set("cpu", 42.0);
        let sampled = source.sample().await.unwrap();
        assert_eq!(sampled["cpu"], 42.0);
    }
}
