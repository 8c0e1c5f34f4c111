// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `filter` action: range, duplicate, rate_limit, pattern, threshold
//!. Each sub-type that needs memory across points
//! (duplicate, rate_limit) keys its state by `device_id.key` in a
//! `DashMap` local to this action instance.

use std::collections::VecDeque;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use gateway_core::Point;

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSubType {
    Range,
    Duplicate,
    RateLimit,
    Pattern,
    Threshold,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub sub_type: FilterSubType,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default = "default_dup_window")]
    pub window: usize,
    #[serde(default)]
    pub max_rate: Option<f64>,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub drop_on_match: bool,

    #[serde(skip)]
    history: DashMap<String, Mutex<VecDeque<f64>>>,
    #[serde(skip)]
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

fn default_dup_window() -> usize {
    5
}

fn default_rate_window_ms() -> u64 {
    1000
}

impl FilterConfig {
    fn point_key(point: &Point) -> String {
        format!("{}.{}", point.device_id(), point.key())
    }

    /// Returns `true` when the point should be excluded (dropped), before
    /// `drop_on_match` inversion is applied.
    fn matches_drop(&self, point: &Point) -> Result<bool, EvalError> {
        match self.sub_type {
            FilterSubType::Range => {
                let value = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("range filter".into()))?;
                let below = self.min.is_some_and(|m| value < m);
                let above = self.max.is_some_and(|m| value > m);
                Ok(below || above)
            }
            FilterSubType::Duplicate => {
                let value = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("duplicate filter".into()))?;
                let tolerance = self.tolerance.unwrap_or(0.0);
                let key = Self::point_key(point);
                let entry = self.history.entry(key).or_insert_with(|| Mutex::new(VecDeque::new()));
                let mut history = entry.lock();
                let is_dup = history.iter().any(|v| (v - value).abs() <= tolerance);
                history.push_back(value);
                while history.len() > self.window {
                    history.pop_front();
                }
                Ok(is_dup)
            }
            FilterSubType::RateLimit => {
                let max_rate = self.max_rate.unwrap_or(f64::INFINITY);
                let key = Self::point_key(point);
                let entry = self.buckets.entry(key).or_insert_with(|| {
                    Mutex::new(TokenBucket { tokens: max_rate, last_refill: Instant::now() })
                });
                let mut bucket = entry.lock();
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                let window_secs = self.window_ms as f64 / 1000.0;
                if window_secs > 0.0 {
                    let refill = (elapsed / window_secs) * max_rate;
                    bucket.tokens = (bucket.tokens + refill).min(max_rate);
                }
                bucket.last_refill = Instant::now();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            FilterSubType::Pattern => {
                let pattern = self.pattern.as_deref().ok_or_else(|| EvalError::Action("pattern filter requires pattern".into()))?;
                let matched = if self.is_regex {
                    Regex::new(pattern).map_err(|e| EvalError::InvalidRegex(e.to_string()))?.is_match(point.key())
                } else {
                    glob_match(pattern, point.key())
                };
                Ok(matched)
            }
            FilterSubType::Threshold => {
                let value = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("threshold filter".into()))?;
                let above = self.upper.is_some_and(|u| value > u);
                let below = self.lower.is_some_and(|l| value < l);
                Ok(above || below)
            }
        }
    }
}

/// A minimal `*`/`?` glob matcher sufficient for key-pattern filters; the
/// bus's own subject wildcards (`*`, `>`) are a different grammar and
/// don't apply to bare key strings.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[async_trait]
impl Action for FilterConfig {
    async fn execute(&self, point: Point, _ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        let drop_matched = self.matches_drop(&point)?;
        let should_drop = drop_matched != self.drop_on_match;
        if should_drop {
            Ok(ActionOutcome::Drop)
        } else {
            Ok(ActionOutcome::Continue(point))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::alert::AlertRuntime;
    use crate::actions::forward::ForwardRuntime;
    use crate::aggregation::AggregationManager;
    use crate::functions::FunctionRegistry;
    use gateway_bus::Bus;
    use gateway_core::Value;
    use std::sync::Arc;

    fn ctx<'a>(
        functions: &'a FunctionRegistry,
        bus: &'a Arc<Bus>,
        aggregation: &'a Arc<AggregationManager>,
        forward: &'a Arc<ForwardRuntime>,
        alerts: &'a AlertRuntime,
    ) -> ActionContext<'a> {
        ActionContext { rule_id: "r1", functions, bus, aggregation, forward, alerts }
    }

    fn config(sub_type: FilterSubType) -> FilterConfig {
        FilterConfig {
            sub_type,
            min: None,
            max: None,
            tolerance: None,
            window: default_dup_window(),
            max_rate: None,
            window_ms: default_rate_window_ms(),
            pattern: None,
            is_regex: false,
            upper: None,
            lower: None,
            drop_on_match: false,
            history: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    #[tokio::test]
    async fn range_drops_out_of_bounds() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let mut cfg = config(FilterSubType::Range);
        cfg.min = Some(0.0);
        cfg.max = Some(100.0);

        let ok = Point::new("d1", "temp", Value::Float(50.0), 0).unwrap();
        let outcome = cfg.execute(ok, &ctx(&functions, &bus, &aggregation, &forward, &alerts)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue(_)));

        let bad = Point::new("d1", "temp", Value::Float(150.0), 0).unwrap();
        let outcome = cfg.execute(bad, &ctx(&functions, &bus, &aggregation, &forward, &alerts)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Drop));
    }

    #[tokio::test]
    async fn duplicate_drops_within_tolerance() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let mut cfg = config(FilterSubType::Duplicate);
        cfg.tolerance = Some(0.5);

        let p1 = Point::new("d1", "temp", Value::Float(50.0), 0).unwrap();
        let outcome = cfg.execute(p1, &ctx(&functions, &bus, &aggregation, &forward, &alerts)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue(_)));

        let p2 = Point::new("d1", "temp", Value::Float(50.2), 1).unwrap();
        let outcome = cfg.execute(p2, &ctx(&functions, &bus, &aggregation, &forward, &alerts)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Drop));
    }

    #[tokio::test]
    async fn drop_on_match_inverts_sense() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let mut cfg = config(FilterSubType::Range);
        cfg.min = Some(0.0);
        cfg.max = Some(100.0);
        cfg.drop_on_match = true;

        let inside = Point::new("d1", "temp", Value::Float(50.0), 0).unwrap();
        let outcome = cfg.execute(inside, &ctx(&functions, &bus, &aggregation, &forward, &alerts)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Drop));
    }

    #[test]
    fn glob_matches_star_and_question() {
        assert!(glob_match("temp_*", "temp_inside"));
        assert!(glob_match("te?p", "temp"));
        assert!(!glob_match("hum_*", "temp_inside"));
    }
}
