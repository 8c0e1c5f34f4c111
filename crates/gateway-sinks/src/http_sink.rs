// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Posts batches of points as a JSON array to an arbitrary HTTP
//! endpoint. Intended for generic webhook-style northbound integrations
//! that don't warrant a dedicated sink.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use gateway_core::{CoreError, Health, Point, Sink};

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize)]
struct HttpParams {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

pub struct HttpSink {
    params: Option<HttpParams>,
    client: reqwest::Client,
    healthy: bool,
}

impl HttpSink {
    pub fn new() -> Self {
        Self { params: None, client: reqwest::Client::new(), healthy: true }
    }
}

impl Default for HttpSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    fn type_name(&self) -> &str {
        "http"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: HttpParams =
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("http sink config: {e}")))?;
        self.params = Some(params);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        let params = self.params.as_ref().ok_or_else(|| CoreError::InvalidPoint("http sink not initialized".into()))?;

        let payload: Vec<JsonValue> = batch.iter().map(|p| p.to_json()).collect::<Result<_, _>>()?;

        let mut request = self.client.post(&params.url).timeout(Duration::from_millis(params.timeout_ms)).json(&payload);
        for (key, value) in &params.headers {
            request = request.header(key, value);
        }

        let resp = request.send().await.map_err(|e| CoreError::InvalidPoint(format!("http sink request failed: {e}")))?;

        if !resp.status().is_success() {
            self.healthy = false;
            return Err(CoreError::InvalidPoint(format!("http sink returned {}", resp.status())));
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
