// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plugin capability sets and lifecycle primitives shared by adapters and
//! sinks. The concrete runtimes (backpressure, batching, retry) live in
//! `gateway-runtime`; this module only defines the trait surface every
//! plugin implements and the small state-machine types the registry and
//! runtime share.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;

use crate::error::CoreError;
use crate::point::Point;
use crate::queue::BoundedQueue;

/// Lifecycle state of a plugin instance. `Uninitialized -> Initialized ->
/// Running -> Stopped`, with `Stopped -> Running` re-entry permitted after
/// a fresh `Start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Health classification derived from last-error presence, the running
/// flag, and any plugin-reported check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A hierarchical cooperative-cancellation token. Cloning shares the same
/// underlying flag, pairing an `Arc<AtomicBool>` running-flag with a
/// `Notify` so waiters can `await` cancellation instead of polling it.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Derive a child handle. Cancelling the child does not cancel the
    /// parent; a future extension could propagate parent -> child, but
    /// today's lifecycle (process -> manager -> plugin) only ever cancels
    /// top-down through explicit `Stop` calls, so a fresh independent
    /// handle per plugin is sufficient.
    pub fn child(&self) -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolve once `cancel()` has been called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Overflow policy applied when an adapter's outbound delivery path (or a
/// sink's inbound buffer) is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Block,
    DropNewest,
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropNewest
    }
}

/// Southbound plugin capability set. The runtime supplies
/// `start` with a cancellation handle and a sender the adapter uses to
/// push produced points; the runtime owns translating those into bus
/// publishes.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn type_name(&self) -> &str;

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError>;

    async fn start(
        &mut self,
        cancel: CancelHandle,
        sink: BoundedQueue<Point>,
    ) -> Result<(), CoreError>;

    async fn stop(&mut self) -> Result<(), CoreError>;

    /// Plugin-reported health check, independent of the runtime-derived
    /// running/last-error view. `None` means "defer entirely to the
    /// runtime's derived health".
    async fn health_check(&self) -> Option<Health> {
        None
    }
}

/// Northbound plugin capability set.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn type_name(&self) -> &str;

    async fn init(&mut self, config: JsonValue) -> Result<(), CoreError>;

    async fn start(&mut self) -> Result<(), CoreError>;

    async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError>;

    async fn stop(&mut self) -> Result<(), CoreError>;

    async fn health_check(&self) -> Option<Health> {
        None
    }
}

/// Nullary constructor stored in the plugin registry.
pub type AdapterFactory = Box<dyn Fn() -> Box<dyn Adapter> + Send + Sync>;
pub type SinkFactory = Box<dyn Fn() -> Box<dyn Sink> + Send + Sync>;
