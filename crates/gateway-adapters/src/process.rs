// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Southbound adapter that drives an external process over the
//! line-delimited JSON stdio protocol: `{method, id, params}` requests,
//! `{id, result|error}` responses, and server-pushed `point` events with
//! no `id` attached.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use gateway_core::{Adapter, BoundedQueue, CancelHandle, CoreError, Point};

#[derive(Debug, Deserialize)]
struct ProcessParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

type Pending = Arc<DashMap<u64, oneshot::Sender<Result<JsonValue, String>>>>;

pub struct ProcessAdapter {
    name: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    points_rx: Option<mpsc::UnboundedReceiver<JsonValue>>,
    reader_task: Option<JoinHandle<()>>,
}

impl ProcessAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            child: None,
            stdin: None,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            points_rx: None,
            reader_task: None,
        }
    }

    async fn call(&mut self, method: &str, params: JsonValue) -> Result<JsonValue, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let line = serde_json::to_string(&json!({"method": method, "id": id, "params": params}))
            .map_err(|e| CoreError::InvalidPoint(e.to_string()))?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CoreError::InvalidPoint("process adapter has no stdin".into()))?;
        stdin.write_all(line.as_bytes()).await.map_err(|e| CoreError::InvalidPoint(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| CoreError::InvalidPoint(e.to_string()))?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(CoreError::InvalidPoint(format!("{method} failed: {message}"))),
            Err(_) => Err(CoreError::InvalidPoint(format!("{method}: process closed before responding"))),
        }
    }
}

#[async_trait]
impl Adapter for ProcessAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "process"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: ProcessParams =
            serde_json::from_value(config.clone()).map_err(|e| CoreError::InvalidPoint(format!("process adapter config: {e}")))?;

        let mut command = Command::new(&params.command);
        command.args(&params.args).envs(&params.env);
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| CoreError::InvalidPoint(format!("failed to spawn {}: {e}", params.command)))?;
        let stdin = child.stdin.take().ok_or_else(|| CoreError::InvalidPoint("child has no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| CoreError::InvalidPoint("child has no stdout".into()))?;

        let (points_tx, points_rx) = mpsc::unbounded_channel();
        let pending = self.pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) if !line.trim().is_empty() => line,
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(%err, "process adapter stdout read failed");
                        return;
                    }
                };
                let value: JsonValue = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(%err, "process adapter sent a malformed line");
                        continue;
                    }
                };
                if let Some(id) = value.get("id").and_then(JsonValue::as_u64) {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let outcome = match value.get("error") {
                            Some(err) => Err(err.to_string()),
                            None => Ok(value.get("result").cloned().unwrap_or(JsonValue::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                } else if value.get("method").and_then(JsonValue::as_str) == Some("point") {
                    let _ = points_tx.send(value.get("params").cloned().unwrap_or(JsonValue::Null));
                }
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.points_rx = Some(points_rx);
        self.reader_task = Some(reader_task);

        self.call("init", config).await?;
        Ok(())
    }

    async fn start(&mut self, cancel: CancelHandle, sink: BoundedQueue<Point>) -> Result<(), CoreError> {
        self.call("start", JsonValue::Null).await?;

        let mut points_rx = self
            .points_rx
            .take()
            .ok_or_else(|| CoreError::InvalidPoint("process adapter not initialized".into()))?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = points_rx.recv() => match event {
                    Some(payload) => match Point::from_json(payload) {
                        Ok(point) => { sink.push(point).await; }
                        Err(err) => tracing::warn!(%err, "process adapter pushed an invalid point"),
                    },
                    None => return Ok(()),
                },
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        let _ = self.call("stop", JsonValue::Null).await;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.stdin = None;
        Ok(())
    }
}
