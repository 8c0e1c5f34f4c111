// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The function library available to expressions: math, string, time, and
//! domain functions (`distance`, `vectorMagnitude`, `inGeofence`,
//! `bearing`, ...), plus `RegisterFunction` for user-supplied extensions
//!.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::{Point, Value};

use crate::error::EvalError;
use crate::expression::ExprValue;

pub type NativeFn = Arc<dyn Fn(&[ExprValue], &Point) -> Result<ExprValue, EvalError> + Send + Sync>;

/// Registered expression functions. Built-ins are installed by
/// [`FunctionRegistry::with_builtins`]; [`FunctionRegistry::register`]
/// adds or overrides entries.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, NativeFn>,
}

fn nums(args: &[ExprValue], name: &str) -> Result<Vec<f64>, EvalError> {
    args.iter()
        .map(|a| a.as_f64().ok_or_else(|| EvalError::TypeMismatch(name.to_string())))
        .collect()
}

fn require(args: &[ExprValue], name: &str, count: usize) -> Result<(), EvalError> {
    if args.len() != count {
        return Err(EvalError::ArgCount(name.to_string(), count, args.len()));
    }
    Ok(())
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_lambda = (lon2 - lon1).to_radians();
    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Pull the `Value::GenericVector`/`Value::Array` named by a field path
/// (or the point's own value, if the argument is the literal `"value"`)
/// for the array-reduction functions (`arrayMean`, `arraySum`, ...).
fn resolve_numeric_array(point: &Point, field: &str) -> Result<Vec<f64>, EvalError> {
    let value = if field == "value" {
        &point.value
    } else {
        return Err(EvalError::UnknownField(field.to_string()));
    };
    match value {
        Value::GenericVector(gv) => Ok(gv.values.clone()),
        Value::Array(items) => Ok(items.iter().filter_map(|v| v.as_f64()).collect()),
        Value::TimeSeries(ts) => Ok(ts.values.clone()),
        _ => Err(EvalError::TypeMismatch("expected an array-shaped value".into())),
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self { functions: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, f: NativeFn) {
        self.functions.insert(name.into(), f);
    }

    pub fn call(&self, name: &str, args: &[ExprValue], point: &Point) -> Result<ExprValue, EvalError> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        f(args, point)
    }

    /// A registry preloaded with the math/string/time/domain library
    /// spec.md §4.6 requires.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();

        reg.register("abs", Arc::new(|args, _| {
            require(args, "abs", 1)?;
            Ok(ExprValue::Num(nums(args, "abs")?[0].abs()))
        }));
        reg.register("sqrt", Arc::new(|args, _| {
            require(args, "sqrt", 1)?;
            Ok(ExprValue::Num(nums(args, "sqrt")?[0].sqrt()))
        }));
        reg.register("min", Arc::new(|args, _| {
            let ns = nums(args, "min")?;
            ns.into_iter()
                .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.min(n))))
                .map(ExprValue::Num)
                .ok_or_else(|| EvalError::ArgCount("min".into(), 1, 0))
        }));
        reg.register("max", Arc::new(|args, _| {
            let ns = nums(args, "max")?;
            ns.into_iter()
                .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.max(n))))
                .map(ExprValue::Num)
                .ok_or_else(|| EvalError::ArgCount("max".into(), 1, 0))
        }));
        reg.register("round", Arc::new(|args, _| {
            require(args, "round", 1)?;
            Ok(ExprValue::Num(nums(args, "round")?[0].round()))
        }));
        reg.register("floor", Arc::new(|args, _| {
            require(args, "floor", 1)?;
            Ok(ExprValue::Num(nums(args, "floor")?[0].floor()))
        }));
        reg.register("ceil", Arc::new(|args, _| {
            require(args, "ceil", 1)?;
            Ok(ExprValue::Num(nums(args, "ceil")?[0].ceil()))
        }));

        reg.register("concat", Arc::new(|args, _| {
            let mut out = String::new();
            for a in args {
                out.push_str(&match a {
                    ExprValue::Str(s) => s.clone(),
                    ExprValue::Num(n) => n.to_string(),
                    ExprValue::Bool(b) => b.to_string(),
                });
            }
            Ok(ExprValue::Str(out))
        }));
        reg.register("lower", Arc::new(|args, _| {
            require(args, "lower", 1)?;
            match &args[0] {
                ExprValue::Str(s) => Ok(ExprValue::Str(s.to_lowercase())),
                _ => Err(EvalError::TypeMismatch("lower".into())),
            }
        }));
        reg.register("upper", Arc::new(|args, _| {
            require(args, "upper", 1)?;
            match &args[0] {
                ExprValue::Str(s) => Ok(ExprValue::Str(s.to_uppercase())),
                _ => Err(EvalError::TypeMismatch("upper".into())),
            }
        }));

        reg.register("now", Arc::new(|args, _| {
            require(args, "now", 0)?;
            Ok(ExprValue::Num(chrono::Utc::now().timestamp_millis() as f64))
        }));

        reg.register("distance", Arc::new(|args, _| {
            require(args, "distance", 4)?;
            let n = nums(args, "distance")?;
            Ok(ExprValue::Num(haversine(n[0], n[1], n[2], n[3])))
        }));
        reg.register("bearing", Arc::new(|args, _| {
            require(args, "bearing", 4)?;
            let n = nums(args, "bearing")?;
            Ok(ExprValue::Num(bearing_degrees(n[0], n[1], n[2], n[3])))
        }));
        reg.register("inGeofence", Arc::new(|args, _| {
            require(args, "inGeofence", 5)?;
            let n = nums(args, "inGeofence")?;
            let d = haversine(n[0], n[1], n[2], n[3]);
            Ok(ExprValue::Bool(d <= n[4]))
        }));
        reg.register("vectorMagnitude", Arc::new(|args, _| {
            require(args, "vectorMagnitude", 3)?;
            let n = nums(args, "vectorMagnitude")?;
            Ok(ExprValue::Num((n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt()))
        }));
        reg.register("genericVectorMagnitude", Arc::new(|args, _| {
            let n = nums(args, "genericVectorMagnitude")?;
            Ok(ExprValue::Num(n.iter().map(|v| v * v).sum::<f64>().sqrt()))
        }));

        reg.register("arrayMean", Arc::new(|args, point| {
            require(args, "arrayMean", 1)?;
            let field = match &args[0] {
                ExprValue::Str(s) => s.clone(),
                _ => return Err(EvalError::TypeMismatch("arrayMean expects a field name".into())),
            };
            let values = resolve_numeric_array(point, &field)?;
            if values.is_empty() {
                return Ok(ExprValue::Num(0.0));
            }
            Ok(ExprValue::Num(values.iter().sum::<f64>() / values.len() as f64))
        }));
        reg.register("arraySum", Arc::new(|args, point| {
            require(args, "arraySum", 1)?;
            let field = match &args[0] {
                ExprValue::Str(s) => s.clone(),
                _ => return Err(EvalError::TypeMismatch("arraySum expects a field name".into())),
            };
            Ok(ExprValue::Num(resolve_numeric_array(point, &field)?.iter().sum()))
        }));
        reg.register("arrayMax", Arc::new(|args, point| {
            require(args, "arrayMax", 1)?;
            let field = match &args[0] {
                ExprValue::Str(s) => s.clone(),
                _ => return Err(EvalError::TypeMismatch("arrayMax expects a field name".into())),
            };
            resolve_numeric_array(point, &field)?
                .into_iter()
                .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.max(n))))
                .map(ExprValue::Num)
                .ok_or_else(|| EvalError::TypeMismatch("arrayMax of empty array".into()))
        }));
        reg.register("arrayMin", Arc::new(|args, point| {
            require(args, "arrayMin", 1)?;
            let field = match &args[0] {
                ExprValue::Str(s) => s.clone(),
                _ => return Err(EvalError::TypeMismatch("arrayMin expects a field name".into())),
            };
            resolve_numeric_array(point, &field)?
                .into_iter()
                .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.min(n))))
                .map(ExprValue::Num)
                .ok_or_else(|| EvalError::TypeMismatch("arrayMin of empty array".into()))
        }));

        reg
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Point {
        Point::new("d1", "temp", Value::Float(1.0), 0).unwrap()
    }

    #[test]
    fn distance_haversine_known_points() {
        let reg = FunctionRegistry::with_builtins();
        // Roughly 1 degree of latitude ~= 111km.
        let result = reg
            .call(
                "distance",
                &[ExprValue::Num(0.0), ExprValue::Num(0.0), ExprValue::Num(1.0), ExprValue::Num(0.0)],
                &point(),
            )
            .unwrap();
        let d = result.as_f64().unwrap();
        assert!((d - 111_195.0).abs() < 1000.0);
    }

    #[test]
    fn vector_magnitude() {
        let reg = FunctionRegistry::with_builtins();
        let result = reg
            .call("vectorMagnitude", &[ExprValue::Num(3.0), ExprValue::Num(4.0), ExprValue::Num(0.0)], &point())
            .unwrap();
        assert_eq!(result, ExprValue::Num(5.0));
    }

    #[test]
    fn in_geofence_true_within_radius() {
        let reg = FunctionRegistry::with_builtins();
        let result = reg
            .call(
                "inGeofence",
                &[
                    ExprValue::Num(0.0),
                    ExprValue::Num(0.0),
                    ExprValue::Num(0.0),
                    ExprValue::Num(0.0),
                    ExprValue::Num(10.0),
                ],
                &point(),
            )
            .unwrap();
        assert_eq!(result, ExprValue::Bool(true));
    }

    #[test]
    fn unknown_function_errors() {
        let reg = FunctionRegistry::with_builtins();
        let err = reg.call("doesNotExist", &[], &point()).unwrap_err();
        assert!(matches!(err, EvalError::UnknownFunction(_)));
    }

    #[test]
    fn array_mean_over_generic_vector() {
        let reg = FunctionRegistry::with_builtins();
        let p = Point::new(
            "d1",
            "multi",
            Value::GenericVector(gateway_core::GenericVector {
                values: vec![1.0, 2.0, 3.0],
                labels: vec![],
                unit: None,
            }),
            0,
        )
        .unwrap();
        let result = reg.call("arrayMean", &[ExprValue::Str("value".into())], &p).unwrap();
        assert_eq!(result, ExprValue::Num(2.0));
    }
}
