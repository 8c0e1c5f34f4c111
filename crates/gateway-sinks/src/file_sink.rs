// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Appends points to a local file, one JSON object per line (`jsonl`) or
//! as a raw CSV row. Writes are serialized per sink instance; size-based
//! rotation renames the current file with a numeric suffix once it
//! crosses `max_bytes`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use gateway_core::{CoreError, Health, Point, Sink};

fn default_format() -> String {
    "jsonl".to_string()
}

fn default_max_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
struct FileParams {
    path: String,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default = "default_max_bytes")]
    max_bytes: u64,
}

pub struct FileSink {
    params: Option<FileParams>,
    file: Option<File>,
    written_bytes: u64,
    rotation_index: u32,
    healthy: bool,
}

impl FileSink {
    pub fn new() -> Self {
        Self { params: None, file: None, written_bytes: 0, rotation_index: 0, healthy: true }
    }

    fn format_line(params: &FileParams, point: &Point) -> Result<String, CoreError> {
        match params.format.as_str() {
            "jsonl" | "json" => {
                let json = point.to_json()?;
                serde_json::to_string(&json).map_err(|e| CoreError::InvalidPoint(e.to_string()))
            }
            "csv" => {
                let value_str = point
                    .value
                    .as_f64()
                    .map(|f| f.to_string())
                    .or_else(|| point.value.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();
                Ok(format!("{},{},{},{}", point.timestamp, point.device_id(), point.key(), value_str))
            }
            other => Err(CoreError::InvalidPoint(format!("unsupported file sink format: {other}"))),
        }
    }

    async fn open_target(path: &str) -> Result<File, CoreError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CoreError::InvalidPoint(format!("failed to open sink file {path}: {e}")))
    }

    async fn rotate(&mut self) -> Result<(), CoreError> {
        let params = self.params.as_ref().expect("rotate called before init");
        let path = PathBuf::from(&params.path);
        self.rotation_index += 1;
        let rotated = path.with_extension(format!("{}.{}", self.rotation_index, path.extension().and_then(|e| e.to_str()).unwrap_or("log")));
        if path.exists() {
            tokio::fs::rename(&path, &rotated)
                .await
                .map_err(|e| CoreError::InvalidPoint(format!("rotation failed: {e}")))?;
        }
        self.file = Some(Self::open_target(&params.path).await?);
        self.written_bytes = 0;
        Ok(())
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn type_name(&self) -> &str {
        "file"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: FileParams =
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("file sink config: {e}")))?;
        self.file = Some(Self::open_target(&params.path).await?);
        self.params = Some(params);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        let params = self.params.as_ref().ok_or_else(|| CoreError::InvalidPoint("file sink not initialized".into()))?.clone();

        for point in &batch {
            let line = Self::format_line(self.params.as_ref().unwrap(), point)?;
            let bytes = line.len() as u64 + 1;
            if self.written_bytes + bytes > params.max_bytes && self.written_bytes > 0 {
                self.rotate().await?;
            }
            let file = self.file.as_mut().ok_or_else(|| CoreError::InvalidPoint("file sink not initialized".into()))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| CoreError::InvalidPoint(format!("write failed: {e}")))?;
            file.write_all(b"\n").await.map_err(|e| CoreError::InvalidPoint(format!("write failed: {e}")))?;
            self.written_bytes += bytes;
        }

        if let Some(file) = self.file.as_mut() {
            file.flush().await.map_err(|e| CoreError::InvalidPoint(format!("flush failed: {e}")))?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush().await;
        }
        self.file = None;
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

    #[tokio::test]
    async fn writes_jsonl_lines() {
        let dir = std::env::temp_dir().join(format!("gateway-file-sink-test-{}", std::process::id()));
        let path = dir.with_extension("jsonl");
        let mut sink = FileSink::new();
        sink.init(serde_json::json!({"path": path.to_string_lossy(), "format": "jsonl"})).await.unwrap();

        let p = Point::new("d1", "temp", Value::Float(1.5), 0).unwrap();
        sink.publish(vec![p]).await.unwrap();
        sink.stop().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"device_id\":\"d1\""));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
