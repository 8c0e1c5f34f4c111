// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A simulator adapter that emits a configured sequence of values at a
//! fixed interval, looping if `repeat` is set. Used in integration tests
//! and local development in place of a real southbound device.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::Duration;

use gateway_core::{Adapter, BoundedQueue, CancelHandle, CoreError, Point, Value};

#[derive(Debug, Clone, Deserialize)]
struct MockParams {
    device_id: String,
    key: String,
    values: Vec<f64>,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default)]
    repeat: bool,
}

fn default_interval_ms() -> u64 {
    100
}

/// Southbound adapter driven entirely by its own config: no network, no
/// process, just a timer emitting `values[i]` at `device_id`/`key` every
/// `interval_ms`.
pub struct MockAdapter {
    name: String,
    params: Option<MockParams>,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: None }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "mock"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: MockParams =
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("mock adapter config: {e}")))?;
        if params.values.is_empty() {
            return Err(CoreError::InvalidPoint("mock adapter requires a non-empty values list".into()));
        }
        self.params = Some(params);
        Ok(())
    }

    async fn start(&mut self, cancel: CancelHandle, sink: BoundedQueue<Point>) -> Result<(), CoreError> {
        let params = self.params.as_ref().ok_or_else(|| CoreError::InvalidPoint("mock adapter not initialized".into()))?.clone();
        let interval = Duration::from_millis(params.interval_ms);

        loop {
            for value in &params.values {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let timestamp = chrono::Utc::now().timestamp_millis();
                let point = Point::new(&params.device_id, &params.key, Value::Float(*value), timestamp)?;
                sink.push(point).await;

                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            if !params.repeat {
                return Ok(());
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::OverflowPolicy;

    #[tokio::test]
    async fn emits_configured_sequence_then_stops() {
        let mut adapter = MockAdapter::new("sim1");
        adapter
            .init(serde_json::json!({
                "device_id": "d1",
                "key": "temp",
                "values": [100.0, 101.0, 102.0, 103.0, 104.0],
                "interval_ms": 1,
            }))
            .await
            .unwrap();

        let queue: BoundedQueue<Point> = BoundedQueue::with_policy(16, OverflowPolicy::DropOldest);
        let cancel = CancelHandle::new();
        adapter.start(cancel, queue.clone()).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(point)) = tokio::time::timeout(Duration::from_millis(50), queue.recv()).await {
            seen.push(point.value.as_f64().unwrap());
        }
        assert_eq!(seen, vec![100.0, 101.0, 102.0, 103.0, 104.0]);
    }

    #[tokio::test]
    async fn init_rejects_empty_values() {
        let mut adapter = MockAdapter::new("sim1");
        let result = adapter
            .init(serde_json::json!({
                "device_id": "d1",
                "key": "temp",
                "values": [],
            }))
            .await;
        assert!(result.is_err());
    }
}
