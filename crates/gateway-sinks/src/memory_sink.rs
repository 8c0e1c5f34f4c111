// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! An in-process, cache-like sink: the last value per `device_id.key` is
//! retained for lookup, plus a bounded history ring per key. Stands in
//! for the "redis-like sink" scenario in spec.md §8 and doubles as a
//! drop-in collector for integration tests that need to assert on what a
//! sink actually received without standing up a real external service.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use gateway_core::{CoreError, Health, Point, Sink};

fn default_history() -> usize {
    100
}

#[derive(Debug, Deserialize, Default)]
struct MemoryParams {
    #[serde(default = "default_history")]
    history: usize,
}

/// Shared, cloneable store so callers (tests, other components) can read
/// back what the sink received after `init` hands a fresh `Box<dyn Sink>`
/// to the runtime.
#[derive(Clone, Default)]
pub struct MemoryStore {
    latest: Arc<DashMap<String, Point>>,
    history: Arc<DashMap<String, VecDeque<Point>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(point: &Point) -> String {
        format!("{}.{}", point.device_id(), point.key())
    }

    fn record(&self, point: Point, capacity: usize) {
        let key = Self::key(&point);
        self.latest.insert(key.clone(), point.clone());
        let mut entry = self.history.entry(key).or_insert_with(VecDeque::new);
        entry.push_back(point);
        while entry.len() > capacity.max(1) {
            entry.pop_front();
        }
    }

    pub fn get(&self, device_id: &str, key: &str) -> Option<Point> {
        self.latest.get(&format!("{device_id}.{key}")).map(|e| e.clone())
    }

    pub fn history(&self, device_id: &str, key: &str) -> Vec<Point> {
        self.history
            .get(&format!("{device_id}.{key}"))
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

pub struct MemorySink {
    store: MemoryStore,
    history_capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self { store: MemoryStore::new(), history_capacity: default_history() }
    }

    /// Build a sink sharing a caller-supplied store, so a test can hold
    /// onto the handle while the runtime owns the boxed sink.
    pub fn with_store(store: MemoryStore) -> Self {
        Self { store, history_capacity: default_history() }
    }

    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn type_name(&self) -> &str {
        "memory"
    }

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError> {
        let params: MemoryParams = if config.is_null() {
            MemoryParams::default()
        } else {
            serde_json::from_value(config).map_err(|e| CoreError::InvalidPoint(format!("memory sink config: {e}")))?
        };
        self.history_capacity = params.history;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
        for point in batch {
            self.store.record(point, self.history_capacity);
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
