// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `transform` action: scale, offset, round, unit_convert, expression,
//! lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use gateway_core::{Point, Value};

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::error::EvalError;
use crate::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSubType {
    Scale,
    Offset,
    Round,
    UnitConvert,
    Expression,
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Ignore,
    Skip,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub sub_type: TransformSubType,
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default)]
    pub constant: Option<f64>,
    #[serde(default)]
    pub precision: Option<i32>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub assign_to: Option<String>,
    #[serde(default)]
    pub table: HashMap<String, JsonValue>,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub add_tags: HashMap<String, String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    #[serde(default)]
    pub on_error: OnError,
}

/// Closed conversion table: unit name -> factor/offset converting to the
/// quantity's base unit (Celsius, metres, kilograms).
fn temperature_to_celsius(value: f64, unit: &str) -> Result<f64, EvalError> {
    match unit {
        "C" => Ok(value),
        "F" => Ok((value - 32.0) * 5.0 / 9.0),
        "K" => Ok(value - 273.15),
        other => Err(EvalError::Action(format!("unknown temperature unit: {other}"))),
    }
}

fn celsius_to(value: f64, unit: &str) -> Result<f64, EvalError> {
    match unit {
        "C" => Ok(value),
        "F" => Ok(value * 9.0 / 5.0 + 32.0),
        "K" => Ok(value + 273.15),
        other => Err(EvalError::Action(format!("unknown temperature unit: {other}"))),
    }
}

fn length_to_metres(value: f64, unit: &str) -> Result<f64, EvalError> {
    let factor = match unit {
        "m" => 1.0,
        "cm" => 0.01,
        "mm" => 0.001,
        "km" => 1000.0,
        "ft" => 0.3048,
        "in" => 0.0254,
        "yd" => 0.9144,
        "mi" => 1609.344,
        other => return Err(EvalError::Action(format!("unknown length unit: {other}"))),
    };
    Ok(value * factor)
}

fn metres_to(value: f64, unit: &str) -> Result<f64, EvalError> {
    let factor = match unit {
        "m" => 1.0,
        "cm" => 0.01,
        "mm" => 0.001,
        "km" => 1000.0,
        "ft" => 0.3048,
        "in" => 0.0254,
        "yd" => 0.9144,
        "mi" => 1609.344,
        other => return Err(EvalError::Action(format!("unknown length unit: {other}"))),
    };
    Ok(value / factor)
}

fn weight_to_kg(value: f64, unit: &str) -> Result<f64, EvalError> {
    let factor = match unit {
        "kg" => 1.0,
        "g" => 0.001,
        "lb" => 0.45359237,
        "oz" => 0.028349523125,
        other => return Err(EvalError::Action(format!("unknown weight unit: {other}"))),
    };
    Ok(value * factor)
}

fn kg_to(value: f64, unit: &str) -> Result<f64, EvalError> {
    let factor = match unit {
        "kg" => 1.0,
        "g" => 0.001,
        "lb" => 0.45359237,
        "oz" => 0.028349523125,
        other => return Err(EvalError::Action(format!("unknown weight unit: {other}"))),
    };
    Ok(value / factor)
}

const TEMPERATURE_UNITS: &[&str] = &["C", "F", "K"];
const LENGTH_UNITS: &[&str] = &["m", "cm", "mm", "km", "ft", "in", "yd", "mi"];
const WEIGHT_UNITS: &[&str] = &["kg", "g", "lb", "oz"];

fn unit_convert(value: f64, from: &str, to: &str) -> Result<f64, EvalError> {
    if TEMPERATURE_UNITS.contains(&from) && TEMPERATURE_UNITS.contains(&to) {
        return celsius_to(temperature_to_celsius(value, from)?, to);
    }
    if LENGTH_UNITS.contains(&from) && LENGTH_UNITS.contains(&to) {
        return metres_to(length_to_metres(value, from)?, to);
    }
    if WEIGHT_UNITS.contains(&from) && WEIGHT_UNITS.contains(&to) {
        return kg_to(weight_to_kg(value, from)?, to);
    }
    Err(EvalError::Action(format!("no conversion path from {from} to {to}")))
}

impl TransformConfig {
    fn apply(&self, point: &mut Point, ctx: &ActionContext<'_>) -> Result<(), EvalError> {
        match self.sub_type {
            TransformSubType::Scale => {
                let factor = self.factor.ok_or_else(|| EvalError::Action("scale requires factor".into()))?;
                let current = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("scale".into()))?;
                point.value = Value::Float(current * factor);
            }
            TransformSubType::Offset => {
                let constant = self.constant.ok_or_else(|| EvalError::Action("offset requires constant".into()))?;
                let current = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("offset".into()))?;
                point.value = Value::Float(current + constant);
            }
            TransformSubType::Round => {
                let precision = self.precision.unwrap_or(0);
                let current = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("round".into()))?;
                let factor = 10f64.powi(precision);
                point.value = Value::Float((current * factor).round() / factor);
            }
            TransformSubType::UnitConvert => {
                let from = self.from.as_deref().ok_or_else(|| EvalError::Action("unit_convert requires from".into()))?;
                let to = self.to.as_deref().ok_or_else(|| EvalError::Action("unit_convert requires to".into()))?;
                let current = point.value.as_f64().ok_or_else(|| EvalError::TypeMismatch("unit_convert".into()))?;
                point.value = Value::Float(unit_convert(current, from, to)?);
            }
            TransformSubType::Expression => {
                let source = self
                    .expression
                    .as_deref()
                    .ok_or_else(|| EvalError::Action("expression transform requires expression".into()))?;
                let expr = Expression::parse(source)?;
                let result = expr.eval(point, ctx.functions)?;
                match self.assign_to.as_deref().unwrap_or("value") {
                    "value" => {
                        point.value = match result {
                            crate::expression::ExprValue::Num(n) => Value::Float(n),
                            crate::expression::ExprValue::Bool(b) => Value::Boolean(b),
                            crate::expression::ExprValue::Str(s) => Value::String(s),
                        };
                    }
                    other if other.starts_with("tags.") => {
                        point.add_tag(&other[5..], result.to_json().to_string());
                    }
                    other => return Err(EvalError::Action(format!("cannot assign to field: {other}"))),
                }
            }
            TransformSubType::Lookup => {
                let key = point
                    .value
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| point.value.as_f64().map(|n| n.to_string()))
                    .ok_or_else(|| EvalError::TypeMismatch("lookup".into()))?;
                let mapped = self.table.get(&key).cloned().or_else(|| self.default.clone());
                match mapped {
                    Some(value) => {
                        point.value = match value {
                            JsonValue::String(s) => Value::String(s),
                            JsonValue::Number(n) => Value::Float(n.as_f64().unwrap_or(0.0)),
                            JsonValue::Bool(b) => Value::Boolean(b),
                            other => Value::String(other.to_string()),
                        };
                    }
                    None => return Err(EvalError::Action(format!("no lookup entry for {key} and no default"))),
                }
            }
        }

        for (k, v) in &self.add_tags {
            point.add_tag(k.clone(), v.clone());
        }
        for k in &self.remove_tags {
            point.tags.remove(k);
        }
        Ok(())
    }
}

#[async_trait]
impl Action for TransformConfig {
    async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        let mut next = point.clone();
        match self.apply(&mut next, ctx) {
            Ok(()) => Ok(ActionOutcome::Continue(next)),
            Err(err) => match self.on_error {
                OnError::Ignore => Ok(ActionOutcome::Continue(point)),
                OnError::Skip => Ok(ActionOutcome::Drop),
                OnError::Fail => Err(err),
            },
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

    #[tokio::test]
    async fn scale_multiplies_numeric_value() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let config = TransformConfig {
            sub_type: TransformSubType::Scale,
            factor: Some(2.0),
            constant: None,
            precision: None,
            from: None,
            to: None,
            expression: None,
            assign_to: None,
            table: HashMap::new(),
            default: None,
            add_tags: HashMap::new(),
            remove_tags: vec![],
            on_error: OnError::Fail,
        };
        let point = Point::new("d1", "temp", Value::Float(10.0), 0).unwrap();
        let outcome = config
            .execute(point, &ctx(&functions, &bus, &aggregation, &forward, &alerts))
            .await
            .unwrap();
        match outcome {
            ActionOutcome::Continue(p) => assert_eq!(p.value.as_f64(), Some(20.0)),
            ActionOutcome::Drop => panic!("expected continue"),
        }
    }

    #[tokio::test]
    async fn unit_convert_celsius_to_fahrenheit() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let config = TransformConfig {
            sub_type: TransformSubType::UnitConvert,
            factor: None,
            constant: None,
            precision: None,
            from: Some("C".into()),
            to: Some("F".into()),
            expression: None,
            assign_to: None,
            table: HashMap::new(),
            default: None,
            add_tags: HashMap::new(),
            remove_tags: vec![],
            on_error: OnError::Fail,
        };
        let point = Point::new("d1", "temp", Value::Float(100.0), 0).unwrap();
        let outcome = config
            .execute(point, &ctx(&functions, &bus, &aggregation, &forward, &alerts))
            .await
            .unwrap();
        match outcome {
            ActionOutcome::Continue(p) => assert_eq!(p.value.as_f64(), Some(212.0)),
            ActionOutcome::Drop => panic!("expected continue"),
        }
    }

    #[tokio::test]
    async fn on_error_skip_drops_point() {
        let functions = FunctionRegistry::with_builtins();
        let bus = Bus::new();
        let aggregation = Arc::new(AggregationManager::new());
        let forward = Arc::new(ForwardRuntime::new(bus.clone()));
        let alerts = AlertRuntime::new(bus.clone());
        let config = TransformConfig {
            sub_type: TransformSubType::Scale,
            factor: None,
            constant: None,
            precision: None,
            from: None,
            to: None,
            expression: None,
            assign_to: None,
            table: HashMap::new(),
            default: None,
            add_tags: HashMap::new(),
            remove_tags: vec![],
            on_error: OnError::Skip,
        };
        let point = Point::new("d1", "temp", Value::Float(10.0), 0).unwrap();
        let outcome = config
            .execute(point, &ctx(&functions, &bus, &aggregation, &forward, &alerts))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Drop));
    }
}
