// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The action pipeline: a tagged action configuration union plus the
//! shared execution context threaded through a rule's ordered action list
//!. `Execute(context, point, rule, config) -> ActionResult |
//! error` from the original design maps onto
//! [`ActionConfig::execute`]/[`ActionOutcome`] here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gateway_bus::Bus;
use gateway_core::Point;

use crate::actions::alert::{AlertConfig, AlertRuntime};
use crate::actions::aggregate::AggregateConfig;
use crate::actions::filter::FilterConfig;
use crate::actions::forward::{ForwardConfig, ForwardRuntime};
use crate::actions::transform::TransformConfig;
use crate::aggregation::AggregationManager;
use crate::error::EvalError;
use crate::functions::FunctionRegistry;

/// Shared services an action needs beyond the point it is operating on.
/// Borrowed for the duration of one rule's action-list execution.
pub struct ActionContext<'a> {
    pub rule_id: &'a str,
    pub functions: &'a FunctionRegistry,
    pub bus: &'a Arc<Bus>,
    pub aggregation: &'a Arc<AggregationManager>,
    pub forward: &'a Arc<ForwardRuntime>,
    pub alerts: &'a AlertRuntime,
}

/// What running an action did to the point flowing through the pipeline.
#[derive(Debug)]
pub enum ActionOutcome {
    /// The point (possibly modified) continues to the next action.
    Continue(Point),
    /// The point is dropped; no further action in this rule runs, and the
    /// point never reaches any forward/sink target downstream.
    Drop,
}

/// The tagged action union making up one entry in a rule's action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Transform(TransformConfig),
    Filter(FilterConfig),
    Aggregate(AggregateConfig),
    Forward(ForwardConfig),
    Alert(AlertConfig),
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError>;
}

impl ActionConfig {
    pub async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        match self {
            ActionConfig::Transform(c) => c.execute(point, ctx).await,
            ActionConfig::Filter(c) => c.execute(point, ctx).await,
            ActionConfig::Aggregate(c) => c.execute(point, ctx).await,
            ActionConfig::Forward(c) => c.execute(point, ctx).await,
            ActionConfig::Alert(c) => c.execute(point, ctx).await,
        }
    }
}
