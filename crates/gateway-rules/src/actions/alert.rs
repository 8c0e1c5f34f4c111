// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `alert` action: level, message template, channels, throttling, and
//! aggregation. Emits on `iot.alerts.<level>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use gateway_bus::{subjects, Bus};
use gateway_core::Point;

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::actions::forward::render_template;
use crate::condition::Condition;
use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Debug => "debug",
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Console,
    Webhook,
    Email,
    Sms,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThrottleConfig {
    pub window_ms: u64,
    pub max_count: u32,
    pub key_template: Option<String>,
}

/// Groups repeated alert triggers for the same `group_by` key into a
/// single summary alert per window instead of emitting one event per
/// point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub window_ms: u64,
    #[serde(default)]
    pub group_by: Vec<String>,
    pub summary_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub level: AlertLevel,
    pub message: String,
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
    #[serde(default)]
    pub conditions: Option<Condition>,
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

struct ThrottleState {
    window_start: Instant,
    count: u32,
}

/// Accumulated state for one aggregation group: the window's start time,
/// how many alerts have landed in it, and the most recent triggering
/// point (used to render `summary_template` field references).
struct AggState {
    window_start: Instant,
    count: u32,
    last_point: Point,
}

/// Per-key throttle counters and per-group aggregation windows for alert
/// actions, shared across rule evaluations.
pub struct AlertRuntime {
    bus: Arc<Bus>,
    throttle: DashMap<String, ThrottleState>,
    aggregates: DashMap<String, AggState>,
}

impl AlertRuntime {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus, throttle: DashMap::new(), aggregates: DashMap::new() }
    }

    fn allow(&self, key: &str, config: &ThrottleConfig) -> bool {
        let mut entry = self
            .throttle
            .entry(key.to_string())
            .or_insert_with(|| ThrottleState { window_start: Instant::now(), count: 0 });
        if entry.window_start.elapsed() >= Duration::from_millis(config.window_ms) {
            entry.window_start = Instant::now();
            entry.count = 0;
        }
        if entry.count >= config.max_count {
            false
        } else {
            entry.count += 1;
            true
        }
    }

    /// Record one alert trigger for `key`. Returns the completed window's
    /// `(count, representative point)` if this trigger rolled a stale
    /// window over, so the caller can emit a summary before starting the
    /// new one. A window that never sees a following trigger is flushed
    /// only when the next one arrives -- there is no background sweeper
    /// for alert aggregation windows, unlike the numeric aggregation
    /// state manager's TTL sweep.
    fn aggregate(&self, key: &str, window: Duration, point: &Point) -> Option<(u32, Point)> {
        let mut entry = self.aggregates.entry(key.to_string()).or_insert_with(|| AggState {
            window_start: Instant::now(),
            count: 0,
            last_point: point.clone(),
        });

        let rolled_over = if entry.window_start.elapsed() >= window {
            let completed = (entry.count, entry.last_point.clone());
            entry.window_start = Instant::now();
            entry.count = 0;
            Some(completed)
        } else {
            None
        };

        entry.count += 1;
        entry.last_point = point.clone();

        rolled_over.filter(|(count, _)| *count > 0)
    }
}

#[async_trait]
impl Action for AlertConfig {
    async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        if let Some(conditions) = &self.conditions {
            if !conditions.evaluate(&point, ctx.functions)? {
                return Ok(ActionOutcome::Continue(point));
            }
        }

        if let Some(throttle) = &self.throttle {
            let key = throttle
                .key_template
                .as_deref()
                .map(|t| render_template(t, &point))
                .unwrap_or_else(|| format!("{}.{}", point.device_id(), point.key()));
            if !ctx.alerts.allow(&key, throttle) {
                return Ok(ActionOutcome::Continue(point));
            }
        }

        if let Some(aggregation) = &self.aggregation {
            let group_key = aggregation
                .group_by
                .iter()
                .map(|field| {
                    crate::fields::resolve(&point, field)
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("|");
            let key = format!("{}\u{0}{}", ctx.rule_id, group_key);
            let window = Duration::from_millis(aggregation.window_ms);

            match ctx.alerts.aggregate(&key, window, &point) {
                Some((count, representative)) => {
                    let message = render_template(&aggregation.summary_template, &representative)
                        .replace("{{count}}", &count.to_string());
                    self.publish(ctx, &representative, message).await?;
                }
                None => return Ok(ActionOutcome::Continue(point)),
            }
            return Ok(ActionOutcome::Continue(point));
        }

        let message = render_template(&self.message, &point);
        self.publish(ctx, &point, message).await?;
        Ok(ActionOutcome::Continue(point))
    }
}

impl AlertConfig {
    async fn publish(&self, ctx: &ActionContext<'_>, point: &Point, message: String) -> Result<(), EvalError> {
        let alert = json!({
            "level": self.level.as_str(),
            "message": message,
            "channels": self.channels,
            "tags": self.tags,
            "rule_id": ctx.rule_id,
            "device_id": point.device_id(),
            "key": point.key(),
            "timestamp": point.timestamp,
        });

        if self.channels.contains(&AlertChannel::Console) {
            tracing::info!(level = self.level.as_str(), %message, "alert");
        }

        ctx.bus
            .publish(&subjects::alert(self.level.as_str()), &alert)
            .await
            .map_err(|e| EvalError::Action(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::forward::ForwardRuntime;
    use crate::aggregation::AggregationManager;
    use crate::functions::FunctionRegistry;
    use gateway_bus::SubscribeOptions;
    use gateway_core::Value;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn alert_publishes_on_level_subject() {
        let bus = Bus::new();
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        bus.subscribe(
            "iot.alerts.warning",
            Arc::new(move |_payload| {
                let counter = counter2.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        let functions = FunctionRegistry::with_builtins();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let ctx = ActionContext { rule_id: "r1", functions: &functions, bus: &bus, aggregation: &aggregation, forward: &forward, alerts: &alerts };

        let config = AlertConfig {
            level: AlertLevel::Warning,
            message: "device {{device_id}} hot".into(),
            channels: vec![AlertChannel::Console],
            conditions: None,
            throttle: None,
            aggregation: None,
            tags: HashMap::new(),
        };
        let point = Point::new("d1", "temp", Value::Float(99.0), 0).unwrap();
        config.execute(point, &ctx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throttle_blocks_after_max_count() {
        let bus = Bus::new();
        let runtime = AlertRuntime::new(bus);
        let cfg = ThrottleConfig { window_ms: 10_000, max_count: 2, key_template: None };
        assert!(runtime.allow("k", &cfg));
        assert!(runtime.allow("k", &cfg));
        assert!(!runtime.allow("k", &cfg));
    }

    #[tokio::test]
    async fn aggregation_emits_one_summary_after_window_rolls_over() {
        let bus = Bus::new();
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        bus.subscribe(
            "iot.alerts.warning",
            Arc::new(move |_payload| {
                let counter = counter2.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        let functions = FunctionRegistry::with_builtins();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let ctx = ActionContext { rule_id: "r1", functions: &functions, bus: &bus, aggregation: &aggregation, forward: &forward, alerts: &alerts };

        let config = AlertConfig {
            level: AlertLevel::Warning,
            message: "device {{device_id}} hot".into(),
            channels: vec![AlertChannel::Console],
            conditions: None,
            throttle: None,
            aggregation: Some(AggregationConfig {
                window_ms: 10,
                group_by: vec!["device_id".into()],
                summary_template: "{{count}} alerts for {{device_id}}".into(),
            }),
            tags: HashMap::new(),
        };

        for i in 0..3 {
            let point = Point::new("d1", "temp", Value::Float(99.0), i).unwrap();
            config.execute(point, &ctx).await.unwrap();
        }
        // No summary yet: the window hasn't rolled over.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let point = Point::new("d1", "temp", Value::Float(99.0), 3).unwrap();
        config.execute(point, &ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
