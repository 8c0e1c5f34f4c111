// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink that bridges gateway [`Point`]s to an InfluxDB v2
//! endpoint via HTTP line-protocol writes. The wire-format writer lives in
//! its own [`line_protocol`] submodule, kept separate from the HTTP
//! transport so it can be tested without a server.

pub mod line_protocol;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use gateway_core::{CoreError, Health, Point, Sink, Value};

use line_protocol::{FieldValue, LineProtocolWriter};

#[derive(Debug, Deserialize)]
struct InfluxParams {
    url: String,
    org: String,
    bucket: String,
    token: String,
    #[serde(default = "default_measurement")]
    measurement: String,
}

fn default_measurement() -> String {
    "points".to_string()
}

/// Flatten a [`Value`] into one or more `(field_name, FieldValue)` pairs,
/// matching InfluxDB's one-field-per-scalar model. Compound shapes expand
/// into dotted sub-fields (`location.lat`, `vector.x`, ...).
fn value_fields(value: &Value) -> Vec<(String, FieldValue)> {
    match value {
        Value::Integer(i) => vec![("value".into(), FieldValue::Integer(*i))],
        Value::Float(f) => vec![("value".into(), FieldValue::Float(*f))],
        Value::Boolean(b) => vec![("value".into(), FieldValue::Boolean(*b))],
        Value::String(s) => vec![("value".into(), FieldValue::String(s.clone()))],
        Value::Location(l) => {
            let mut fields = vec![("lat".into(), FieldValue::Float(l.lat)), ("lon".into(), FieldValue::Float(l.lon))];
            if let Some(alt) = l.alt {
                fields.push(("alt".into(), FieldValue::Float(alt)));
            }
            if let Some(speed) = l.speed {
                fields.push(("speed".into(), FieldValue::Float(speed)));
            }
            if let Some(heading) = l.heading {
                fields.push(("heading".into(), FieldValue::Float(heading)));
            }
            fields
        }
        Value::Vector3(v) => vec![
            ("x".into(), FieldValue::Float(v.x)),
            ("y".into(), FieldValue::Float(v.y)),
            ("z".into(), FieldValue::Float(v.z)),
        ],
        Value::Color(gateway_core::Color::Rgb { r, g, b }) => vec![
            ("r".into(), FieldValue::Integer(*r as i64)),
            ("g".into(), FieldValue::Integer(*g as i64)),
            ("b".into(), FieldValue::Integer(*b as i64)),
        ],
        Value::Color(gateway_core::Color::Hsl { h, s, l }) => vec![
            ("h".into(), FieldValue::Float(*h)),
            ("s".into(), FieldValue::Float(*s)),
            ("l".into(), FieldValue::Float(*l)),
        ],
        Value::GenericVector(v) => v
            .values
            .iter()
            .enumerate()
            .map(|(i, val)| {
                let name = v.labels.get(i).cloned().unwrap_or_else(|| format!("v{i}"));
                (name, FieldValue::Float(*val))
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .flat_map(|(i, v)| value_fields(v).into_iter().map(move |(name, fv)| (format!("{i}.{name}"), fv)))
            .collect(),
        Value::Matrix(m) => vec![
            ("rows".into(), FieldValue::Integer(m.rows as i64)),
            ("cols".into(), FieldValue::Integer(m.cols as i64)),
        ],
        Value::TimeSeries(ts) => vec![("count".into(), FieldValue::Integer(ts.values.len() as i64))],
    }
}

/// HTTP time-series sink writing InfluxDB v2 line-protocol batches.
pub struct InfluxSink {
    params: Option<InfluxParams>,
    client: reqwest::Client,
    healthy: bool,
}

impl InfluxSink {
    pub fn new() -> Self {
        Self { params: None, client: reqwest::Client::new(), healthy: true }
    }
}

impl Default for InfluxSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &str {
        "influx"
    }

    fn type_name(&self) -> &str {
        "influx"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: InfluxParams =
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("influx sink config: {e}")))?;
        self.params = Some(params);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| CoreError::InvalidPoint("influx sink not initialized".into()))?;

        let mut writer = LineProtocolWriter::new();
        for point in &batch {
            let tags_owned: Vec<(String, String)> = point
                .tags_copy()
                .into_iter()
                .chain([("device_id".to_string(), point.device_id().to_string())])
                .collect();
            let tags: Vec<(&str, &str)> = tags_owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let fields = value_fields(&point.value);
            if fields.is_empty() {
                continue;
            }
            let fields_ref: Vec<(&str, FieldValue)> = fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            let timestamp_ns = (point.timestamp.max(0) as u64) * 1_000_000;
            writer.write_point(&params.measurement, &tags, &fields_ref, timestamp_ns);
        }

        let lines = writer.flush();
        if lines.is_empty() {
            return Ok(());
        }
        let body = lines.join("\n");

        let url = format!("{}/api/v2/write?org={}&bucket={}&precision=ns", params.url, params.org, params.bucket);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", params.token))
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::InvalidPoint(format!("influx write failed: {e}")))?;

        if !resp.status().is_success() {
            self.healthy = false;
            return Err(CoreError::InvalidPoint(format!("influx write returned {}", resp.status())));
        }
        self.healthy = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn health_check(&self) -> Option<Health> {
        Some(if self.healthy { Health::Healthy } else { Health::Degraded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Location;

    #[test]
    fn location_flattens_into_lat_lon_fields() {
        let fields = value_fields(&Value::Location(Location { lat: 1.0, lon: 2.0, alt: None, speed: None, heading: None }));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0, "lat");
    }

    #[test]
    fn scalar_value_is_a_single_field() {
        let fields = value_fields(&Value::Float(21.5));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "value");
    }
}
