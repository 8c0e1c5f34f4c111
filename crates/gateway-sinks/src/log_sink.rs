// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The trivial sink: logs every point it receives via `tracing` at a
//! configurable level. Useful for local debugging and as the default
//! sink in example configs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::Level;

use gateway_core::{CoreError, Health, Point, Sink};

#[derive(Debug, Deserialize, Default)]
struct LogParams {
    #[serde(default)]
    level: Option<String>,
}

fn parse_level(level: Option<&str>) -> Level {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    }
}

pub struct LogSink {
    level: Level,
}

impl LogSink {
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn type_name(&self) -> &str {
        "log"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: LogParams = if config.is_null() {
            LogParams::default()
        } else {
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("log sink config: {e}")))?
        };
        self.level = parse_level(params.level.as_deref());
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        for point in &batch {
            match self.level {
                Level::TRACE => tracing::trace!(device_id = point.device_id(), key = point.key(), value = ?point.value, "point"),
                Level::DEBUG => tracing::debug!(device_id = point.device_id(), key = point.key(), value = ?point.value, "point"),
                Level::WARN => tracing::warn!(device_id = point.device_id(), key = point.key(), value = ?point.value, "point"),
                Level::ERROR => tracing::error!(device_id = point.device_id(), key = point.key(), value = ?point.value, "point"),
                Level::INFO => tracing::info!(device_id = point.device_id(), key = point.key(), value = ?point.value, "point"),
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn health_check(&self) -> Option<Health> {
        Some(Health::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level(Some("verbose")), Level::INFO);
        assert_eq!(parse_level(Some("DEBUG")), Level::DEBUG);
    }
}
