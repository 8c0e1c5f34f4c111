// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The rule dispatch engine: subscribes to `iot.data.>`,
//! evaluates enabled rules in priority order against each incoming point,
//! and runs a matched rule's action list in declared order.
//!
//! Rule storage is an [`arc_swap::ArcSwap`] over a priority-sorted `Vec`,
//! matching `SchemaRegistry`'s "replace the whole map, swap the pointer"
//! update discipline: a single evaluation sees either the old rule set or
//! the new one, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use thiserror::Error;

use gateway_bus::{subjects, Bus, SubscribeOptions, Subscription};
use gateway_core::metrics::MetricsCore;
use gateway_core::Point;

use crate::action::{ActionContext, ActionOutcome};
use crate::actions::alert::AlertRuntime;
use crate::actions::forward::ForwardRuntime;
use crate::aggregation::AggregationManager;
use crate::functions::FunctionRegistry;
use crate::rule::Rule;

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("rule {0} failed validation: {1}")]
    Invalid(String, String),
    #[error("duplicate rule id: {0}")]
    Duplicate(String),
}

/// One rule's condition/actions plus its pre-computed `(priority, id)`
/// ordering key, kept alongside it so dispatch never re-derives the key
/// per evaluation.
struct RankedRule {
    rule: Rule,
}

fn validate_rule(rule: &Rule) -> Result<(), RuleLoadError> {
    if rule.id.is_empty() {
        return Err(RuleLoadError::Invalid(rule.id.clone(), "id must not be empty".into()));
    }
    if rule.name.is_empty() {
        return Err(RuleLoadError::Invalid(rule.id.clone(), "name must not be empty".into()));
    }
    Ok(())
}

/// Priority-sorted, replace-or-reject rule table plus the shared services
/// (condition function library, aggregation state, forward/alert
/// runtimes) every rule's action list needs.
pub struct RuleEngine {
    bus: Arc<Bus>,
    metrics: Arc<MetricsCore>,
    rules: ArcSwap<Vec<RankedRule>>,
    functions: Arc<FunctionRegistry>,
    aggregation: Arc<AggregationManager>,
    forward: Arc<ForwardRuntime>,
    alerts: Arc<AlertRuntime>,
    /// Bounds the number of `async: true` actions running concurrently
    /// across all rules, sized from `rule_engine.worker_pool_size`
    ///.
    worker_permits: Arc<tokio::sync::Semaphore>,
    subscription: parking_lot::Mutex<Option<Subscription>>,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

pub struct RuleEngineOptions {
    pub sweep_interval: Duration,
}

impl Default for RuleEngineOptions {
    fn default() -> Self {
        Self { sweep_interval: Duration::from_secs(30) }
    }
}

const DEFAULT_WORKER_POOL_SIZE: usize = 8;

impl RuleEngine {
    pub fn new(bus: Arc<Bus>, metrics: Arc<MetricsCore>) -> Arc<Self> {
        Self::with_worker_pool_size(bus, metrics, DEFAULT_WORKER_POOL_SIZE)
    }

    /// `worker_pool_size` caps how many `async: true` actions may be
    /// in flight at once.
    pub fn with_worker_pool_size(bus: Arc<Bus>, metrics: Arc<MetricsCore>, worker_pool_size: usize) -> Arc<Self> {
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = Arc::new(AlertRuntime::new(bus.clone()));
        Arc::new(Self {
            bus,
            metrics,
            rules: ArcSwap::from_pointee(Vec::new()),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            aggregation,
            forward,
            alerts,
            worker_permits: Arc::new(tokio::sync::Semaphore::new(worker_pool_size.max(1))),
            subscription: parking_lot::Mutex::new(None),
            sweeper: parking_lot::Mutex::new(None),
        })
    }

    /// Register a custom condition/expression function beyond the
    /// built-in library. Must be called
    /// before `start`; the registry itself isn't behind a lock since every
    /// call site today happens during wiring, before any point flows.
    pub fn function_registry(&self) -> &FunctionRegistry {
        self.functions.as_ref()
    }

    /// Atomically replace the whole rule set, rejecting the update (and
    /// leaving the previous set untouched) if any rule fails validation or
    /// a duplicate id is present.
    pub fn load_rules(&self, mut rules: Vec<Rule>) -> Result<(), RuleLoadError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            validate_rule(rule)?;
            if !seen.insert(rule.id.clone()) {
                return Err(RuleLoadError::Duplicate(rule.id.clone()));
            }
        }
        rules.sort_by(|a, b| a.dispatch_key().cmp(&b.dispatch_key()));
        self.metrics.rules.rules_total.store(rules.len() as u64, std::sync::atomic::Ordering::Relaxed);
        self.metrics.rules.rules_enabled.store(
            rules.iter().filter(|r| r.enabled).count() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
        let ranked: Vec<RankedRule> = rules.into_iter().map(|rule| RankedRule { rule }).collect();
        self.rules.store(Arc::new(ranked));
        Ok(())
    }

    /// Atomically add or replace a single rule without disturbing the
    /// rest of the loaded set.
    pub fn upsert_rule(&self, rule: Rule) -> Result<(), RuleLoadError> {
        validate_rule(&rule)?;
        let current = self.rules.load();
        let mut rules: Vec<Rule> = current.iter().map(|r| r.rule.clone()).collect();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
        self.load_rules(rules)
    }

    pub fn remove_rule(&self, rule_id: &str) {
        let current = self.rules.load();
        let rules: Vec<Rule> = current.iter().map(|r| r.rule.clone()).filter(|r| r.id != rule_id).collect();
        let _ = self.load_rules(rules);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }

    /// Subscribe to the raw-data subject hierarchy and spawn the TTL
    /// sweeper.
    pub async fn start(self: &Arc<Self>, options: RuleEngineOptions) -> Result<(), gateway_core::GatewayError> {
        let engine = self.clone();
        let handler: gateway_bus::Handler = Arc::new(move |payload| {
            let engine = engine.clone();
            Box::pin(async move {
                let point: Point = match serde_json::from_value((*payload).clone()) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::debug!(%err, "rule engine failed to decode bus payload as a point");
                        return;
                    }
                };
                engine.dispatch(point).await;
            })
        });

        let subscription = self
            .bus
            .subscribe(subjects::data_wildcard(), handler, SubscribeOptions::default())
            .map_err(|e| gateway_core::GatewayError::PluginStartError(e.to_string()))?;
        *self.subscription.lock() = Some(subscription);

        let sweep_engine = self.clone();
        let sweep_interval = options.sweep_interval;
        let sweeper = tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep_interval).await;
                sweep_engine.aggregation.sweep();
            }
        });
        *self.sweeper.lock() = Some(sweeper);

        tracing::info!("rule engine started");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(sub) = self.subscription.lock().take() {
            sub.unsubscribe();
        }
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
    }

    /// Evaluate every enabled rule (already priority-ordered) against one
    /// point, running the action list of each one that matches. One
    /// rule's unhandled error never aborts another's evaluation. Open question (a) resolved per spec.md §9: a `filter`
    /// drop is local to that rule's own pipeline, not global -- the next
    /// rule still evaluates against the original point.
    pub async fn dispatch(&self, point: Point) {
        let rules = self.rules.load();
        for ranked in rules.iter() {
            let rule = &ranked.rule;
            if !rule.enabled {
                continue;
            }
            let started = Instant::now();
            let matched = rule.condition.evaluate(&point, &self.functions);
            match matched {
                Ok(false) => {
                    self.metrics.rules.record_evaluation(false, started.elapsed().as_nanos() as u64);
                }
                Err(_) => {
                    self.metrics.rules.record_condition_error();
                }
                Ok(true) => {
                    self.metrics.rules.record_evaluation(true, started.elapsed().as_nanos() as u64);
                    self.run_actions(rule, point.clone()).await;
                }
            }
        }
    }

    async fn run_actions(&self, rule: &Rule, mut point: Point) {
        let ctx = ActionContext {
            rule_id: &rule.id,
            functions: self.functions.as_ref(),
            bus: &self.bus,
            aggregation: &self.aggregation,
            forward: &self.forward,
            alerts: self.alerts.as_ref(),
        };
        for entry in &rule.actions {
            if let Some(gate) = &entry.meta.conditions {
                match gate.evaluate(&point, &self.functions) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        self.metrics.rules.record_condition_error();
                        continue;
                    }
                }
            }

            if entry.meta.is_async {
                // Async actions run on the worker pool and never block the
                // matching loop; the next action in this rule still sees
                // the point as it stood before this one ran.
                self.spawn_async_action(rule.id.clone(), entry.clone(), point.clone());
                continue;
            }

            let outcome = execute_with_retry(entry, point.clone(), &ctx).await;

            match outcome {
                Ok(ActionOutcome::Continue(p)) => {
                    self.metrics.rules.record_action(true);
                    point = p;
                }
                Ok(ActionOutcome::Drop) => {
                    self.metrics.rules.record_action(true);
                    return;
                }
                Err(err) => {
                    self.metrics.rules.record_action(false);
                    tracing::warn!(rule = %rule.id, %err, "rule action failed, continuing to next action");
                }
            }
        }
    }

    /// Hand an `async: true` action to the bounded worker pool. Acquiring
    /// the semaphore permit itself happens inside the spawned task so a
    /// saturated pool still doesn't block `run_actions`/the matching loop.
    fn spawn_async_action(&self, rule_id: String, entry: crate::rule::ActionEntry, point: Point) {
        let bus = self.bus.clone();
        let aggregation = self.aggregation.clone();
        let forward = self.forward.clone();
        let alerts = self.alerts.clone();
        let functions = self.functions.clone();
        let metrics = self.metrics.clone();
        let permits = self.worker_permits.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire().await;
            let ctx = ActionContext {
                rule_id: &rule_id,
                functions: functions.as_ref(),
                bus: &bus,
                aggregation: &aggregation,
                forward: &forward,
                alerts: alerts.as_ref(),
            };
            match execute_with_retry(&entry, point, &ctx).await {
                Ok(_) => metrics.rules.record_action(true),
                Err(err) => {
                    metrics.rules.record_action(false);
                    tracing::warn!(rule = %rule_id, %err, "async rule action failed");
                }
            }
        });
    }
}

/// Run one action, applying its declared timeout and retrying up to
/// `entry.meta.retry.attempts` times on failure. Used for both sync (inline,
/// awaited) and async (spawned onto the worker pool) actions.
async fn execute_with_retry<'a>(
    entry: &crate::rule::ActionEntry,
    point: Point,
    ctx: &ActionContext<'a>,
) -> Result<ActionOutcome, crate::error::EvalError> {
    let mut attempt = 0u32;
    loop {
        let run = entry.config.execute(point.clone(), ctx);
        let result = match entry.meta.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), run).await {
                Ok(result) => result,
                Err(_) => Err(crate::error::EvalError::Action("action timed out".into())),
            },
            None => run.await,
        };
        match result {
            Ok(outcome) => return Ok(outcome),
            Err(_err) if attempt < entry.meta.retry.attempts => {
                attempt += 1;
                tokio::time::sleep(entry.meta.retry.delay_for_attempt(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Snapshot of loaded rule ids and enabled state, used by the metrics
/// endpoint and admin surfaces.
pub fn rule_summary(rules: &[Rule]) -> HashMap<String, bool> {
    rules.iter().map(|r| (r.id.clone(), r.enabled)).collect()
}
