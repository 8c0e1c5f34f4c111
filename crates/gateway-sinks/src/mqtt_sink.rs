// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishes each point as a JSON payload to an MQTT broker. Connection
//! setup mirrors the rules engine's forward-action MQTT target: a single
//! `AsyncClient` with its event loop driven on a background task for the
//! lifetime of the sink.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use gateway_core::{CoreError, Health, Point, Sink};

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
struct MqttParams {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    topic_template: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default = "default_qos")]
    qos: u8,
    #[serde(default)]
    retain: bool,
}

pub struct MqttSink {
    params: Option<MqttParams>,
    client: Option<rumqttc::AsyncClient>,
    eventloop_task: Option<JoinHandle<()>>,
    healthy: bool,
}

impl MqttSink {
    pub fn new() -> Self {
        Self { params: None, client: None, eventloop_task: None, healthy: true }
    }

    fn render_topic(template: &str, point: &Point) -> String {
        template.replace("{{device_id}}", point.device_id()).replace("{{key}}", point.key())
    }
}

impl Default for MqttSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn type_name(&self) -> &str {
        "mqtt"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: MqttParams =
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("mqtt sink config: {e}")))?;
        self.params = Some(params);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        let params = self.params.as_ref().ok_or_else(|| CoreError::InvalidPoint("mqtt sink not initialized".into()))?;
        let client_id = params.client_id.clone().unwrap_or_else(|| format!("gateway-sink-{}", &params.host));
        let mut opts = rumqttc::MqttOptions::new(client_id, params.host.clone(), params.port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = rumqttc::AsyncClient::new(opts, 64);

        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt sink connection error");
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.eventloop_task = Some(task);
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        let params = self.params.as_ref().ok_or_else(|| CoreError::InvalidPoint("mqtt sink not initialized".into()))?;
        let client = self.client.as_ref().ok_or_else(|| CoreError::InvalidPoint("mqtt sink not started".into()))?;
        let qos = match params.qos {
            0 => rumqttc::QoS::AtMostOnce,
            1 => rumqttc::QoS::AtLeastOnce,
            _ => rumqttc::QoS::ExactlyOnce,
        };

        for point in &batch {
            let topic = Self::render_topic(&params.topic_template, point);
            let payload = point.to_json().map_err(|e| CoreError::InvalidPoint(e.to_string()))?.to_string();
            if let Err(err) = client.publish(topic, qos, params.retain, payload).await {
                self.healthy = false;
                return Err(CoreError::InvalidPoint(format!("mqtt publish failed: {err}")));
            }
        }
        self.healthy = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        if let Some(task) = self.eventloop_task.take() {
            task.abort();
        }
        self.client = None;
        Ok(())
    }

    async fn health_check(&self) -> Option<Health> {
        Some(if self.healthy { Health::Healthy } else { Health::Degraded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Value;

    #[test]
    fn topic_template_substitutes_device_and_key() {
        let point = Point::new("sensor-1", "temp", Value::Float(1.0), 0).unwrap();
        let topic = MqttSink::render_topic("iot/{{device_id}}/{{key}}", &point);
        assert_eq!(topic, "iot/sensor-1/temp");
    }
}
