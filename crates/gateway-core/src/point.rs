// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The canonical unit of data crossing every boundary in the gateway.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;

/// Geographic location with optional motion attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

/// 3D vector (acceleration, orientation, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Color in either RGB or HSL space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "space", rename_all = "lowercase")]
pub enum Color {
    Rgb { r: u8, g: u8, b: u8 },
    Hsl { h: f64, s: f64, l: f64 },
}

/// A labelled vector of arbitrary length (e.g. a multi-channel sensor read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericVector {
    pub values: Vec<f64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// A dense row-major matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

/// A paired sequence of timestamps and values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

/// The dynamic value carried by a [`Point`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Location(Location),
    Vector3(Vector3),
    Color(Color),
    GenericVector(GenericVector),
    Array(Vec<Value>),
    Matrix(Matrix),
    TimeSeries(TimeSeries),
}

/// Labels the shape of a [`Value`] without carrying the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Float,
    Boolean,
    String,
    Location,
    Vector3,
    Color,
    GenericVector,
    Array,
    Matrix,
    TimeSeries,
}

impl Value {
    /// The [`ValueType`] this value's shape corresponds to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Location(_) => ValueType::Location,
            Value::Vector3(_) => ValueType::Vector3,
            Value::Color(_) => ValueType::Color,
            Value::GenericVector(_) => ValueType::GenericVector,
            Value::Array(_) => ValueType::Array,
            Value::Matrix(_) => ValueType::Matrix,
            Value::TimeSeries(_) => ValueType::TimeSeries,
        }
    }

    /// Best-effort coercion to `f64`, used by the condition evaluator and
    /// numeric transforms. Returns `None` for shapes with no single scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Tag storage shared behind a single writer/many-reader lock so that
/// `GetTagsCopy` is a cheap snapshot and never exposes internal storage.
#[derive(Debug, Clone, Default)]
pub struct Tags(Arc<RwLock<HashMap<String, String>>>);

impl Tags {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(HashMap::new())))
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    /// Insert or overwrite a tag.
    pub fn add(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.0.write().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.read().get(key).cloned()
    }

    /// A shallow, internally-consistent copy safe to hand to callers.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Serialize for Tags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = HashMap::<String, String>::deserialize(deserializer)?;
        Ok(Tags::from_map(map))
    }
}

/// The canonical datum crossing every boundary in the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    device_id: String,
    key: String,
    pub value: Value,
    pub timestamp: i64,
    #[serde(default)]
    pub quality: i32,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Point {
    /// Construct a new point. `device_id` and `key` must be non-empty.
    pub fn new(
        device_id: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        timestamp: i64,
    ) -> Result<Self, CoreError> {
        let device_id = device_id.into();
        let key = key.into();
        if device_id.is_empty() {
            return Err(CoreError::InvalidPoint("device_id must not be empty".into()));
        }
        if key.is_empty() {
            return Err(CoreError::InvalidPoint("key must not be empty".into()));
        }
        Ok(Self {
            device_id,
            key,
            value,
            timestamp,
            quality: 0,
            tags: Tags::new(),
            metadata: HashMap::new(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn add_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.add(key, value);
    }

    pub fn get_tag(&self, key: &str) -> Option<String> {
        self.tags.get(key)
    }

    pub fn tags_copy(&self) -> HashMap<String, String> {
        self.tags.snapshot()
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = quality;
        self
    }

    /// Rebind `device_id`, producing a new point (device_id/key/type stay
    /// immutable on any single instance; a transform that needs to change
    /// them constructs a fresh one via these builders).
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::InvalidPoint(e.to_string()))
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|e| CoreError::InvalidPoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_rejects_empty_device_id() {
        let err = Point::new("", "temp", Value::Float(1.0), 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPoint(_)));
    }

    #[test]
    fn construct_rejects_empty_key() {
        let err = Point::new("d1", "", Value::Float(1.0), 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPoint(_)));
    }

    #[test]
    fn tags_roundtrip_through_snapshot() {
        let p = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        p.add_tag("unit", "C");
        p.add_tag("site", "building-1");
        let snap = p.tags_copy();
        assert_eq!(snap.get("unit").map(String::as_str), Some("C"));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn tags_add_is_last_write_wins() {
        let p = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        p.add_tag("unit", "C");
        p.add_tag("unit", "F");
        assert_eq!(p.get_tag("unit").as_deref(), Some("F"));
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let p = Point::new("d1", "temp", Value::Float(22.5), 1000).unwrap();
        p.add_tag("unit", "C");
        let json = p.to_json().unwrap();
        let p2 = Point::from_json(json).unwrap();
        assert_eq!(p2.device_id(), "d1");
        assert_eq!(p2.key(), "temp");
        assert_eq!(p2.value, Value::Float(22.5));
        assert_eq!(p2.get_tag("unit").as_deref(), Some("C"));
    }

    #[test]
    fn compound_value_roundtrip() {
        let v = Value::Location(Location {
            lat: 1.0,
            lon: 2.0,
            alt: Some(3.0),
            speed: None,
            heading: None,
        });
        let p = Point::new("d1", "gps", v.clone(), 0).unwrap();
        let json = p.to_json().unwrap();
        let p2 = Point::from_json(json).unwrap();
        assert_eq!(p2.value, v);
    }

    #[test]
    fn as_f64_coerces_numeric_shapes() {
        assert_eq!(Value::Integer(5).as_f64(), Some(5.0));
        assert_eq!(Value::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(Value::String("x".into()).as_f64(), None);
    }
}
