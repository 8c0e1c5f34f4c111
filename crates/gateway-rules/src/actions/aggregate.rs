// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `aggregate` action: feeds the point's value
//! into the keyed [`crate::aggregation::AggregationManager`], then emits a
//! summary point whose `value` is a mapping of function name -> result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gateway_bus::subjects;
use gateway_core::{GenericVector, Point, Value};

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::aggregation::AggregateParams;
use crate::error::EvalError;
use crate::fields;

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_value_field() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateOutput {
    pub key_template: String,
    #[serde(default)]
    pub forward: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub window_size: usize,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    pub functions: Vec<String>,
    #[serde(default = "default_value_field")]
    pub value_field: String,
    #[serde(default)]
    pub above_threshold: Option<f64>,
    #[serde(default)]
    pub below_threshold: Option<f64>,
    #[serde(default)]
    pub in_range: Option<(f64, f64)>,
    pub output: AggregateOutput,
}

impl AggregateConfig {
    fn group_key(&self, point: &Point) -> String {
        if self.group_by.is_empty() {
            return format!("{}.{}", point.device_id(), point.key());
        }
        self.group_by
            .iter()
            .map(|path| fields::resolve(point, path).map(|v| v.to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[async_trait]
impl Action for AggregateConfig {
    async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        let value = fields::resolve(&point, &self.value_field).and_then(|v| fields::as_f64(&v));
        let group_key = self.group_key(&point);
        let ttl = Duration::from_millis(self.ttl_ms);

        ctx.aggregation.update(ctx.rule_id, &group_key, value, self.window_size, ttl);

        let params = AggregateParams {
            above_threshold: self.above_threshold,
            below_threshold: self.below_threshold,
            in_range: self.in_range,
        };
        if let Some(result) = ctx.aggregation.compute(ctx.rule_id, &group_key, &self.functions, &params) {
            let labels: Vec<String> = result.values.iter().map(|(name, _)| name.clone()).collect();
            let values: Vec<f64> = result.values.iter().map(|(_, v)| v.unwrap_or(f64::NAN)).collect();

            let key = self.output.key_template.replace("{{group_key}}", &group_key).replace("{{rule_id}}", ctx.rule_id);
            let mut summary = Point::new(point.device_id(), key, Value::GenericVector(GenericVector { values, labels, unit: None }), point.timestamp)
                .map_err(|e| EvalError::Action(e.to_string()))?;
            summary.metadata.insert("window".into(), serde_json::json!(result.window_size));
            summary.metadata.insert("group_by".into(), serde_json::json!(self.group_by));
            summary.metadata.insert("count".into(), serde_json::json!(result.count));

            if self.output.forward {
                ctx.bus
                    .publish(&subjects::rule(ctx.rule_id), &summary)
                    .await
                    .map_err(|e| EvalError::Action(e.to_string()))?;
            }
        }

        Ok(ActionOutcome::Continue(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::alert::AlertRuntime;
    use crate::actions::forward::ForwardRuntime;
    use crate::aggregation::AggregationManager;
    use crate::functions::FunctionRegistry;
    use gateway_bus::{Bus, SubscribeOptions};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn aggregate_forwards_summary_point() {
        let bus = Bus::new();
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        bus.subscribe(
            "iot.rules.r1",
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

        let config = AggregateConfig {
            group_by: vec![],
            window_size: 0,
            ttl_ms: default_ttl_ms(),
            functions: vec!["count".into(), "avg".into()],
            value_field: default_value_field(),
            above_threshold: None,
            below_threshold: None,
            in_range: None,
            output: AggregateOutput { key_template: "agg.{{group_key}}".into(), forward: true },
        };

        let point = Point::new("d1", "temp", Value::Float(10.0), 0).unwrap();
        config.execute(point, &ctx).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
