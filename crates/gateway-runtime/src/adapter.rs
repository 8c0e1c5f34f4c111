// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adapter lifecycle, health, and backpressure.
//!
//! The runtime owns a bounded outbound queue between the adapter's
//! producer loop and a forwarder task that translates each produced point
//! into a bus publish on `iot.data.<device>.<key>`. The adapter pushes
//! through [`gateway_core::BoundedQueue::push`], which applies the
//! configured [`OverflowPolicy`] without the adapter needing to know which
//! policy is active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_bus::{subjects, Bus};
use gateway_core::metrics::AdapterStats;
use gateway_core::{
    Adapter, BoundedQueue, CancelHandle, GatewayError, Health, OverflowPolicy, PluginState, Point,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_OUTBOUND_CAPACITY: usize = 1000;

/// Wraps a boxed [`Adapter`] with the shared lifecycle/health/backpressure
/// discipline every adapter gets regardless of type.
///
/// While `Running`, the adapter box lives inside the spawned task that
/// drives its producer loop; `adapter_slot` is where that task deposits
/// the box back once `start()` returns, so a subsequent `start()` call can
/// take it out again.
pub struct AdapterRuntime {
    name: String,
    type_name: String,
    adapter_slot: Arc<Mutex<Option<Box<dyn Adapter>>>>,
    bus: Arc<Bus>,
    stats: Arc<AdapterStats>,
    state: RwLock<PluginState>,
    cancel: RwLock<CancelHandle>,
    overflow_policy: OverflowPolicy,
    outbound_capacity: usize,
    stop_grace: Duration,
    has_error: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    leaked: AtomicBool,
}

pub struct AdapterRuntimeOptions {
    pub overflow_policy: OverflowPolicy,
    pub outbound_capacity: usize,
    pub stop_grace: Duration,
}

impl Default for AdapterRuntimeOptions {
    fn default() -> Self {
        Self {
            overflow_policy: OverflowPolicy::DropNewest,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl AdapterRuntime {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        adapter: Box<dyn Adapter>,
        bus: Arc<Bus>,
        stats: Arc<AdapterStats>,
        options: AdapterRuntimeOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            type_name: type_name.into(),
            adapter_slot: Arc::new(Mutex::new(Some(adapter))),
            bus,
            stats,
            state: RwLock::new(PluginState::Uninitialized),
            cancel: RwLock::new(CancelHandle::new()),
            overflow_policy: options.overflow_policy,
            outbound_capacity: options.outbound_capacity,
            stop_grace: options.stop_grace,
            has_error: AtomicBool::new(false),
            task: Mutex::new(None),
            forwarder: Mutex::new(None),
            leaked: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    pub async fn init(&self, config: serde_json::Value) -> Result<(), GatewayError> {
        let mut adapter = self
            .adapter_slot
            .lock()
            .take()
            .ok_or_else(|| GatewayError::PluginInitError(format!("{} is running", self.name)))?;
        let result = adapter.init(config).await;
        *self.adapter_slot.lock() = Some(adapter);
        result.map_err(|e| GatewayError::PluginInitError(e.to_string()))?;
        *self.state.write() = PluginState::Initialized;
        Ok(())
    }

    /// Start the adapter's producer loop. Takes the adapter box out of
    /// `adapter_slot` for the duration of the run; the driving task
    /// deposits it back when `Adapter::start` returns (on cancellation or
    /// error).
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        let mut adapter = self
            .adapter_slot
            .lock()
            .take()
            .ok_or_else(|| GatewayError::PluginStartError(format!("{} already running", self.name)))?;

        let cancel = CancelHandle::new();
        *self.cancel.write() = cancel.clone();

        let queue: BoundedQueue<Point> =
            BoundedQueue::with_policy(self.outbound_capacity, self.overflow_policy);

        let bus = self.bus.clone();
        let stats = self.stats.clone();
        let forward_queue = queue.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(point) = forward_queue.recv().await {
                let produced_at = point.timestamp;
                let subject = subjects::data(point.device_id(), point.key());
                match bus.publish(&subject, &point).await {
                    Ok(()) => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        let latency_us = ((now_ms - produced_at).max(0) as u64) * 1000;
                        stats.record_produced(latency_us);
                    }
                    Err(err) => {
                        stats.record_error();
                        tracing::warn!(%err, "adapter forwarder failed to publish point");
                    }
                }
            }
        });
        *self.forwarder.lock() = Some(forwarder);

        let name = self.name.clone();
        let run_cancel = cancel.clone();
        let run_queue = queue.clone();
        let stats_for_task = self.stats.clone();
        let adapter_slot = self.adapter_slot.clone();
        let runtime = self.clone();

        let task = tokio::spawn(async move {
            let result = adapter.start(run_cancel, run_queue.clone()).await;
            if let Err(err) = result {
                stats_for_task.record_error();
                runtime.has_error.store(true, Ordering::Relaxed);
                tracing::error!(adapter = %name, %err, "adapter start loop exited with error");
            }
            run_queue.close();
            *adapter_slot.lock() = Some(adapter);
        });
        *self.task.lock() = Some(task);

        *self.state.write() = PluginState::Running;
        tracing::info!(adapter = %self.name, "adapter started");
        Ok(())
    }

    pub fn health(&self) -> Health {
        if self.state() != PluginState::Running {
            return Health::Unhealthy;
        }
        if self.has_error.load(Ordering::Relaxed) {
            return Health::Degraded;
        }
        Health::Healthy
    }

    /// System subject an adapter health transition is published on
    ///.
    pub fn health_subject(&self) -> String {
        format!("adapter.{}.health", self.name)
    }

    /// Stop the adapter, waiting up to `stop_grace` for its producer loop
    /// to exit. Exceeding the grace does not leave the runtime
    /// inconsistent: the adapter is still marked `Stopped` and a leak
    /// counter is incremented.
    pub async fn stop(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.state() == PluginState::Stopped && self.task.lock().is_none() {
            return Ok(());
        }
        self.cancel.read().cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(self.stop_grace, task).await {
                Ok(_) => {}
                Err(_) => {
                    self.leaked.store(true, Ordering::Relaxed);
                    *self.state.write() = PluginState::Stopped;
                    return Err(GatewayError::StopTimeout(self.name.clone()));
                }
            }
        }
        if let Some(forwarder) = self.forwarder.lock().take() {
            let _ = tokio::time::timeout(self.stop_grace, forwarder).await;
        }
        *self.state.write() = PluginState::Stopped;
        Ok(())
    }

    pub fn leaked(&self) -> bool {
        self.leaked.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<AdapterStats> {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::CoreError;
    use std::time::Duration as StdDuration;

    struct CountingAdapter {
        count: u32,
    }

    #[async_trait]
    impl Adapter for CountingAdapter {
        fn name(&self) -> &str {
            "counter"
        }
        fn type_name(&self) -> &str {
            "counter"
        }
        async fn init(&mut self, _config: serde_json::Value) -> Result<(), CoreError> {
            Ok(())
        }
        async fn start(
            &mut self,
            cancel: CancelHandle,
            sink: BoundedQueue<Point>,
        ) -> Result<(), CoreError> {
            for i in 0..self.count {
                if cancel.is_cancelled() {
                    break;
                }
                let point = Point::new("d1", "temp", gateway_core::Value::Float(i as f64), i as i64)
                    .unwrap();
                sink.push(point).await;
            }
            cancel.cancelled().await;
            Ok(())
        }
        async fn stop(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lifecycle_init_start_stop() {
        let bus = Bus::new();
        let stats = Arc::new(AdapterStats::default());
        let runtime = AdapterRuntime::new(
            "a1",
            "counter",
            Box::new(CountingAdapter { count: 5 }),
            bus,
            stats,
            AdapterRuntimeOptions::default(),
        );

        runtime.init(serde_json::json!({})).await.unwrap();
        assert_eq!(runtime.state(), PluginState::Initialized);

        runtime.start().await.unwrap();
        assert_eq!(runtime.state(), PluginState::Running);

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(runtime.stats().points_produced.load(Ordering::Relaxed), 5);

        runtime.stop().await.unwrap();
        assert_eq!(runtime.state(), PluginState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let bus = Bus::new();
        let stats = Arc::new(AdapterStats::default());
        let runtime = AdapterRuntime::new(
            "a1",
            "counter",
            Box::new(CountingAdapter { count: 1 }),
            bus,
            stats,
            AdapterRuntimeOptions::default(),
        );
        runtime.init(serde_json::json!({})).await.unwrap();
        runtime.start().await.unwrap();
        runtime.stop().await.unwrap();
        runtime.stop().await.unwrap();
        assert_eq!(runtime.state(), PluginState::Stopped);
    }
}
