// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `forward` action: re-emit a point to a `nats`, `http`, `mqtt`, or
//! `file` target, with templated subject/topic/path/payload. MQTT connections and file handles are pooled/reused per target
//! identity rather than opened per point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use gateway_bus::Bus;
use gateway_core::config::RetryConfig;
use gateway_core::Point;

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::error::EvalError;
use crate::fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForwardTargetKind {
    #[default]
    Nats,
    Http,
    Mqtt,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Bearer,
    Basic,
    ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Json,
    Xml,
    Csv,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    Jsonl,
    Json,
    Xml,
    Csv,
    Template,
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_expect_status() -> u16 {
    200
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub target: ForwardTargetKind,

    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub auth: Option<AuthKind>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub content: ContentKind,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,

    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default)]
    pub append: bool,
    #[serde(default)]
    pub rotate_bytes: Option<u64>,

    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub payload_template: Option<String>,
}

static TEMPLATE_FIELD: OnceCell<Regex> = OnceCell::new();

fn template_field_regex() -> &'static Regex {
    TEMPLATE_FIELD.get_or_init(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").unwrap())
}

/// Substitute `{{field}}` placeholders with the point's resolved field
/// values, rendering strings bare and other JSON shapes via their
/// canonical textual form.
pub(crate) fn render_template(template: &str, point: &Point) -> String {
    template_field_regex()
        .replace_all(template, |caps: &regex::Captures| {
            let path = &caps[1];
            match fields::resolve(point, path) {
                Some(JsonValue::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

fn default_payload(point: &Point, content: ContentKind, template: Option<&str>) -> Result<String, EvalError> {
    match content {
        ContentKind::Json => point.to_json().map(|v| v.to_string()).map_err(|e| EvalError::Action(e.to_string())),
        ContentKind::Template => {
            let template = template.ok_or_else(|| EvalError::Action("template content requires payload_template".into()))?;
            Ok(render_template(template, point))
        }
        ContentKind::Csv => {
            let json = point.to_json().map_err(|e| EvalError::Action(e.to_string()))?;
            Ok(json
                .as_object()
                .map(|obj| obj.values().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
                .unwrap_or_default())
        }
        ContentKind::Xml => {
            Ok(format!(
                "<point device_id=\"{}\" key=\"{}\" timestamp=\"{}\"/>",
                point.device_id(),
                point.key(),
                point.timestamp
            ))
        }
    }
}

struct MqttConnection {
    client: rumqttc::AsyncClient,
}

/// Shared clients/locks so repeated forward actions reuse connections and
/// serialize concurrent writers to the same file path, rather than
/// re-dialing or racing per point.
pub struct ForwardRuntime {
    bus: Arc<Bus>,
    http: reqwest::Client,
    mqtt: DashMap<String, Arc<MqttConnection>>,
    file_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ForwardRuntime {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            http: reqwest::Client::new(),
            mqtt: DashMap::new(),
            file_locks: DashMap::new(),
        }
    }

    fn mqtt_connection(&self, host: &str, port: u16, client_id: &str) -> Arc<MqttConnection> {
        let key = format!("{host}:{port}:{client_id}");
        if let Some(conn) = self.mqtt.get(&key) {
            return conn.clone();
        }
        let mut opts = rumqttc::MqttOptions::new(client_id.to_string(), host.to_string(), port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = rumqttc::AsyncClient::new(opts, 64);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt forward connection error");
                        break;
                    }
                }
            }
        });
        let conn = Arc::new(MqttConnection { client });
        self.mqtt.insert(key, conn.clone());
        conn
    }

    fn file_lock(&self, path: &str) -> Arc<AsyncMutex<()>> {
        self.file_locks.entry(path.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn send_once(&self, config: &ForwardConfig, point: &Point) -> Result<(), EvalError> {
        match config.target {
            ForwardTargetKind::Nats => {
                let subject_template = config.subject.as_deref().ok_or_else(|| EvalError::Action("nats target requires subject".into()))?;
                let subject = render_template(subject_template, point);
                let payload = point.to_json().map_err(|e| EvalError::Action(e.to_string()))?;
                self.bus.publish(&subject, &payload).await.map_err(|e| EvalError::Action(e.to_string()))
            }
            ForwardTargetKind::Http => {
                let url_template = config.url.as_deref().ok_or_else(|| EvalError::Action("http target requires url".into()))?;
                let url = render_template(url_template, point);
                let body = default_payload(point, config.content, config.payload_template.as_deref())?;

                let method = reqwest::Method::from_bytes(config.method.as_bytes())
                    .map_err(|_| EvalError::Action(format!("invalid http method: {}", config.method)))?;
                let mut req = self.http.request(method, &url).timeout(Duration::from_millis(config.timeout_ms)).body(body);
                for (k, v) in &config.headers {
                    req = req.header(k, v);
                }
                req = match config.auth {
                    Some(AuthKind::Bearer) => {
                        let token = config.token.as_deref().unwrap_or_default();
                        req.bearer_auth(token)
                    }
                    Some(AuthKind::Basic) => {
                        let user = config.username.as_deref().unwrap_or_default();
                        req.basic_auth(user, config.password.as_deref())
                    }
                    Some(AuthKind::ApiKey) => req.header("X-Api-Key", config.token.as_deref().unwrap_or_default()),
                    None => req,
                };

                let resp = req.send().await.map_err(|e| EvalError::Action(e.to_string()))?;
                if resp.status().as_u16() != config.expect_status {
                    return Err(EvalError::Action(format!(
                        "forward http target returned {}, expected {}",
                        resp.status(),
                        config.expect_status
                    )));
                }
                Ok(())
            }
            ForwardTargetKind::Mqtt => {
                let host = config.host.as_deref().ok_or_else(|| EvalError::Action("mqtt target requires host".into()))?;
                let topic_template = config.topic.as_deref().ok_or_else(|| EvalError::Action("mqtt target requires topic".into()))?;
                let topic = render_template(topic_template, point);
                let client_id = config.client_id.clone().unwrap_or_else(|| format!("gateway-forward-{host}"));
                let conn = self.mqtt_connection(host, config.port, &client_id);
                let qos = match config.qos {
                    0 => rumqttc::QoS::AtMostOnce,
                    1 => rumqttc::QoS::AtLeastOnce,
                    _ => rumqttc::QoS::ExactlyOnce,
                };
                let payload = point.to_json().map_err(|e| EvalError::Action(e.to_string()))?.to_string();
                conn.client
                    .publish(topic, qos, config.retain, payload)
                    .await
                    .map_err(|e| EvalError::Action(e.to_string()))
            }
            ForwardTargetKind::File => {
                let path_template = config.path.as_deref().ok_or_else(|| EvalError::Action("file target requires path".into()))?;
                let path = render_template(path_template, point);
                let lock = self.file_lock(&path);
                let _guard = lock.lock().await;

                if let Some(limit) = config.rotate_bytes {
                    if let Ok(meta) = tokio::fs::metadata(&path).await {
                        if meta.len() >= limit {
                            let rotated = format!("{path}.1");
                            let _ = tokio::fs::rename(&path, &rotated).await;
                        }
                    }
                }

                let body = match config.file_format {
                    FileFormat::Jsonl => format!("{}\n", point.to_json().map_err(|e| EvalError::Action(e.to_string()))?),
                    FileFormat::Json => point.to_json().map_err(|e| EvalError::Action(e.to_string()))?.to_string(),
                    FileFormat::Csv => default_payload(point, ContentKind::Csv, None)? + "\n",
                    FileFormat::Xml => default_payload(point, ContentKind::Xml, None)? + "\n",
                    FileFormat::Template => {
                        let template = config.payload_template.as_deref().ok_or_else(|| EvalError::Action("template format requires payload_template".into()))?;
                        format!("{}\n", render_template(template, point))
                    }
                };

                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(config.append || matches!(config.file_format, FileFormat::Jsonl))
                    .write(true)
                    .open(&path)
                    .await?;
                file.write_all(body.as_bytes()).await?;
                Ok(())
            }
        }
    }

    async fn send_with_retry(&self, config: &ForwardConfig, point: &Point) -> Result<(), EvalError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(config, point).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < config.retry.attempts => {
                    attempt += 1;
                    let delay = config.retry.delay_for_attempt(attempt);
                    tracing::warn!(%attempt, error = %err, "forward action retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Action for ForwardConfig {
    async fn execute(&self, point: Point, ctx: &ActionContext<'_>) -> Result<ActionOutcome, EvalError> {
        if self.is_async {
            let config = self.clone();
            let point_clone = point.clone();
            let forward = ctx.forward.clone();
            tokio::spawn(async move {
                if let Err(err) = forward.send_with_retry(&config, &point_clone).await {
                    tracing::warn!(error = %err, "async forward action failed");
                }
            });
            return Ok(ActionOutcome::Continue(point));
        }

        ctx.forward.send_with_retry(self, &point).await?;
        Ok(ActionOutcome::Continue(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Value;

    #[test]
    fn render_template_substitutes_fields() {
        let p = Point::new("d1", "temp", Value::Float(21.5), 0).unwrap();
        let rendered = render_template("devices/{{device_id}}/{{key}}", &p);
        assert_eq!(rendered, "devices/d1/temp");
    }

    #[test]
    fn render_template_leaves_unknown_blank() {
        let p = Point::new("d1", "temp", Value::Float(21.5), 0).unwrap();
        let rendered = render_template("{{tags.missing}}", &p);
        assert_eq!(rendered, "");
    }
}
