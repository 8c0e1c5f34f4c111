// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The condition tree: `simple`, `expression`, `script`, `and`, `or`, `not`
//!. Rust's default externally-tagged enum serde encoding
//! produces exactly the documented `{simple: {...}}` / `{expression: "..."}`
//! shapes without any custom tag attribute.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use gateway_core::Point;

use crate::error::EvalError;
use crate::expression::Expression;
use crate::fields;
use crate::functions::FunctionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleCondition {
    pub field: String,
    pub operator: SimpleOperator,
    pub value: JsonValue,
}

/// A condition tree node. External tagging gives `{"simple": {...}}`,
/// `{"and": [...]}`, `{"not": {...}}`, matching the declared document
/// shape; `script` is accepted for forward document compatibility but has
/// no interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Simple(SimpleCondition),
    Expression(String),
    Script(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            (x.as_f64().unwrap_or(f64::NAN) - y.as_f64().unwrap_or(f64::NAN)).abs() < f64::EPSILON
        }
        _ => a == b,
    }
}

fn compare(field: &JsonValue, value: &JsonValue, op: SimpleOperator) -> Result<bool, EvalError> {
    match op {
        SimpleOperator::Eq => Ok(values_equal(field, value)),
        SimpleOperator::Ne => Ok(!values_equal(field, value)),
        SimpleOperator::Gt | SimpleOperator::Gte | SimpleOperator::Lt | SimpleOperator::Lte => {
            let (a, b) = (
                fields::as_f64(field).ok_or_else(|| EvalError::TypeMismatch("relational operator".into()))?,
                fields::as_f64(value).ok_or_else(|| EvalError::TypeMismatch("relational operator".into()))?,
            );
            Ok(match op {
                SimpleOperator::Gt => a > b,
                SimpleOperator::Gte => a >= b,
                SimpleOperator::Lt => a < b,
                SimpleOperator::Lte => a <= b,
                _ => unreachable!(),
            })
        }
        SimpleOperator::Contains => {
            let haystack = field.as_str().ok_or_else(|| EvalError::TypeMismatch("contains".into()))?;
            let needle = value.as_str().ok_or_else(|| EvalError::TypeMismatch("contains".into()))?;
            Ok(haystack.contains(needle))
        }
        SimpleOperator::Regex => {
            let haystack = field.as_str().ok_or_else(|| EvalError::TypeMismatch("regex".into()))?;
            let pattern = value.as_str().ok_or_else(|| EvalError::TypeMismatch("regex".into()))?;
            let re = Regex::new(pattern).map_err(|e| EvalError::InvalidRegex(e.to_string()))?;
            Ok(re.is_match(haystack))
        }
    }
}

impl Condition {
    /// Evaluate against `point`. A missing field or a type mismatch is an
    /// error, not a silent non-match, so the caller can count it
    /// separately.
    pub fn evaluate(&self, point: &Point, functions: &FunctionRegistry) -> Result<bool, EvalError> {
        match self {
            Condition::Simple(simple) => {
                let field = fields::resolve(point, &simple.field)
                    .ok_or_else(|| EvalError::UnknownField(simple.field.clone()))?;
                compare(&field, &simple.value, simple.operator)
            }
            Condition::Expression(source) => {
                let expr = Expression::parse(source)?;
                Ok(expr.eval(point, functions)?.as_bool())
            }
            Condition::Script(_) => Err(EvalError::Parse("script conditions have no interpreter".into())),
            Condition::And(children) => {
                for c in children {
                    if !c.evaluate(point, functions)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(children) => {
                for c in children {
                    if c.evaluate(point, functions)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(point, functions)?),
        }
    }
}
