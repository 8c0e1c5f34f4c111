// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink lifecycle, health, batching dispatch, retry, and subscriber-sink
//! (nested fan-out) composition.
//!
//! The runtime binds a sink to one or more bus subscriptions; each
//! received message runs through filter -> decode/transform (`message`
//! module) -> a per-sink inbound buffer. A background dispatch loop
//! drains that buffer into a [`crate::batch::BatchBuffer`] and calls the
//! boxed [`Sink::publish`] once `batch_size` is reached or
//! `flush_interval` elapses, applying the configured retry policy on
//! failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_bus::{Bus, SubscribeOptions};
use gateway_core::config::SinkConfig;
use gateway_core::metrics::SinkStats;
use gateway_core::{BoundedQueue, GatewayError, Health, PluginState, Point, Sink};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::batch::BatchBuffer;
use crate::filter::apply_filters;
use crate::message::decode;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Wraps a boxed [`Sink`] with the shared lifecycle/health/batching/retry
/// discipline every sink gets regardless of type, plus the nested
/// subscriber-sink fan-out described in spec.md §4.5.
pub struct SinkRuntime {
    config: SinkConfig,
    sink_slot: Arc<Mutex<Option<Box<dyn Sink>>>>,
    bus: Arc<Bus>,
    stats: Arc<SinkStats>,
    state: RwLock<PluginState>,
    inbound: RwLock<Option<BoundedQueue<Point>>>,
    subscriptions: Mutex<Vec<gateway_bus::Subscription>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    targets: Vec<Arc<SinkRuntime>>,
    flush_interval: Duration,
    publish_timeout: Duration,
    stop_grace: Duration,
    has_error: AtomicBool,
}

impl SinkRuntime {
    pub fn new(sink: Box<dyn Sink>, config: SinkConfig, bus: Arc<Bus>, stats: Arc<SinkStats>) -> Arc<Self> {
        let targets = Vec::new();
        Arc::new(Self {
            config,
            sink_slot: Arc::new(Mutex::new(Some(sink))),
            bus,
            stats,
            state: RwLock::new(PluginState::Uninitialized),
            inbound: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            dispatch_task: Mutex::new(None),
            targets,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            has_error: AtomicBool::new(false),
        })
    }

    /// Attach nested sinks this sink forwards its own batches to
    ///. Must be called before `start`.
    pub fn with_targets(mut self: Arc<Self>, targets: Vec<Arc<SinkRuntime>>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_targets called before any clone of the Arc exists")
            .targets = targets;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn type_name(&self) -> &str {
        &self.config.type_name
    }

    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    pub async fn init(self: &Arc<Self>) -> Result<(), GatewayError> {
        self.config
            .validate()
            .map_err(|e| GatewayError::PluginInitError(e.to_string()))?;
        let mut sink = self
            .sink_slot
            .lock()
            .take()
            .ok_or_else(|| GatewayError::PluginInitError(format!("{} is running", self.name())))?;
        let result = sink.init(self.config.params.clone()).await;
        *self.sink_slot.lock() = Some(sink);
        result.map_err(|e| GatewayError::PluginInitError(e.to_string()))?;

        for target in &self.targets {
            target.init().await?;
        }
        *self.state.write() = PluginState::Initialized;
        Ok(())
    }

    /// Start the sink: bring up nested targets, subscribe to configured
    /// bus subjects, and spawn the dispatch loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        let mut sink = self
            .sink_slot
            .lock()
            .take()
            .ok_or_else(|| GatewayError::PluginStartError(format!("{} already running", self.name())))?;
        sink.start()
            .await
            .map_err(|e| GatewayError::PluginStartError(e.to_string()))?;
        *self.sink_slot.lock() = Some(sink);

        for target in &self.targets {
            target.start().await?;
        }

        let inbound: BoundedQueue<Point> = BoundedQueue::new(self.config.buffer_size);
        *self.inbound.write() = Some(inbound.clone());

        let mut subs = Vec::new();
        for sub_cfg in &self.config.subscriptions {
            if !sub_cfg.enabled {
                continue;
            }
            let filters = self.config.filters.clone();
            let sub_cfg = sub_cfg.clone();
            let stats = self.stats.clone();
            let queue = inbound.clone();
            let handler: gateway_bus::Handler = Arc::new(move |payload| {
                let filters = filters.clone();
                let sub_cfg = sub_cfg.clone();
                let stats = stats.clone();
                let queue = queue.clone();
                Box::pin(async move {
                    let point = match decode(&payload, &sub_cfg) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::debug!(%err, "sink subscription failed to decode payload");
                            stats.record_failure(1, err.to_string());
                            return;
                        }
                    };
                    if !apply_filters(&point, &filters) {
                        stats.record_filtered();
                        return;
                    }
                    if !queue.try_enqueue(point) {
                        stats.record_overflow();
                    }
                });
            });

            let options = SubscribeOptions::default();
            let subscription = if let Some(group) = &sub_cfg.queue_group {
                self.bus
                    .queue_subscribe(&sub_cfg.subject, group, handler, options)
                    .map_err(|e| GatewayError::PluginStartError(e.to_string()))?
            } else {
                self.bus
                    .subscribe(&sub_cfg.subject, handler, options)
                    .map_err(|e| GatewayError::PluginStartError(e.to_string()))?
            };
            subs.push(subscription);
        }
        *self.subscriptions.lock() = subs;

        let runtime = self.clone();
        let task = tokio::spawn(async move {
            runtime.dispatch_loop(inbound).await;
        });
        *self.dispatch_task.lock() = Some(task);

        *self.state.write() = PluginState::Running;
        tracing::info!(sink = %self.name(), "sink started");
        Ok(())
    }

    /// Drain the inbound buffer into a [`BatchBuffer`], flushing on size
    /// or the configured interval, whichever comes first.
    async fn dispatch_loop(self: Arc<Self>, inbound: BoundedQueue<Point>) {
        let mut batch = BatchBuffer::new(self.config.batch_size.max(1), self.flush_interval);
        loop {
            let wait = batch.time_until_flush().min(Duration::from_millis(200));
            let received = tokio::time::timeout(wait, inbound.recv()).await;
            match received {
                Ok(Some(point)) => {
                    if let Some(ready) = batch.add(point) {
                        self.flush(ready).await;
                    }
                }
                Ok(None) => {
                    // Inbound queue closed (stop in progress); flush what remains.
                    if !batch.is_empty() {
                        self.flush(batch.flush()).await;
                    }
                    return;
                }
                Err(_) => {
                    if batch.should_flush() {
                        self.flush(batch.flush()).await;
                    }
                }
            }
        }
    }

    /// Apply sink-global static tags, time the publish call, update
    /// statistics, and run the retry policy on failure.
    async fn flush(&self, mut points: Vec<Point>) {
        if points.is_empty() {
            return;
        }
        for point in &mut points {
            for (k, v) in &self.config.tags {
                point.add_tag(k.clone(), v.clone());
            }
        }

        let count = points.len() as u64;
        let mut attempt = 0u32;
        loop {
            let Some(mut sink) = self.sink_slot.lock().take() else { return };
            let started = Instant::now();
            let result = tokio::time::timeout(self.publish_timeout, sink.publish(points.clone())).await;
            *self.sink_slot.lock() = Some(sink);

            match result {
                Ok(Ok(())) => {
                    let latency_us = started.elapsed().as_micros() as u64;
                    self.stats.record_success(count, latency_us);
                    self.has_error.store(false, Ordering::Relaxed);
                    self.forward_to_targets(points).await;
                    return;
                }
                Ok(Err(err)) => {
                    self.stats.record_failure(count, err.to_string());
                    self.has_error.store(true, Ordering::Relaxed);
                }
                Err(_) => {
                    self.stats.record_failure(count, "publish timed out");
                    self.has_error.store(true, Ordering::Relaxed);
                }
            }

            if attempt >= self.config.retry.attempts {
                return;
            }
            attempt += 1;
            tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
        }
    }

    /// Forward a successfully published batch into nested sinks. Each
    /// target's failure is independent and does not abort fan-out to the
    /// others.
    async fn forward_to_targets(&self, points: Vec<Point>) {
        for target in &self.targets {
            target.flush(points.clone()).await;
        }
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

    pub async fn stop(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.state() == PluginState::Stopped && self.dispatch_task.lock().is_none() {
            return Ok(());
        }

        for sub in self.subscriptions.lock().drain(..) {
            sub.unsubscribe();
        }
        if let Some(queue) = self.inbound.write().take() {
            queue.close();
        }

        let task = self.dispatch_task.lock().take();
        let mut stop_timed_out = false;
        if let Some(task) = task {
            if tokio::time::timeout(self.stop_grace, task).await.is_err() {
                stop_timed_out = true;
            }
        }

        if let Some(mut sink) = self.sink_slot.lock().take() {
            let _ = sink.stop().await;
            *self.sink_slot.lock() = Some(sink);
        }

        for target in &self.targets {
            let _ = target.stop().await;
        }

        *self.state.write() = PluginState::Stopped;
        if stop_timed_out {
            return Err(GatewayError::StopTimeout(self.name().to_string()));
        }
        Ok(())
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::config::{SinkSubscriptionConfig, SubscriptionDataType};
    use gateway_core::{CoreError, Value};
    use serde_json::Value as JsonValue;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    struct CollectingSink {
        received: Arc<AtomicU64>,
        fail_until: u32,
        attempts: u32,
    }

    #[async_trait]
    impl Sink for CollectingSink {
        fn name(&self) -> &str {
            "collector"
        }
        fn type_name(&self) -> &str {
            "collector"
        }
        async fn init(&mut self, _config: JsonValue) -> Result<(), CoreError> {
            Ok(())
        }
        async fn start(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn publish(&mut self, batch: Vec<Point>) -> Result<(), CoreError> {
            self.attempts += 1;
            if self.attempts <= self.fail_until {
                return Err(CoreError::InvalidPoint("simulated failure".into()));
            }
            self.received.fetch_add(batch.len() as u64, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn config(name: &str) -> SinkConfig {
        SinkConfig {
            name: name.to_string(),
            type_name: "collector".to_string(),
            batch_size: 2,
            buffer_size: 100,
            tags: HashMap::new(),
            params: JsonValue::Null,
            subscriptions: vec![SinkSubscriptionConfig {
                subject: "iot.data.>".into(),
                queue_group: None,
                data_type: SubscriptionDataType::Raw,
                enabled: true,
                tags: HashMap::new(),
                transform: None,
            }],
            filters: vec![],
            retry: Default::default(),
            target_sinks: vec![],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn batches_and_publishes_on_size() {
        let bus = Bus::new();
        let received = Arc::new(AtomicU64::new(0));
        let sink = Box::new(CollectingSink {
            received: received.clone(),
            fail_until: 0,
            attempts: 0,
        });
        let stats = Arc::new(SinkStats::default());
        let runtime = SinkRuntime::new(sink, config("s1"), bus.clone(), stats);
        runtime.init().await.unwrap();
        runtime.start().await.unwrap();

        for i in 0..4i64 {
            let point = Point::new("d1", "temp", Value::Float(i as f64), i).unwrap();
            bus.publish("iot.data.d1.temp", &point).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(received.load(Ordering::SeqCst), 4);

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let bus = Bus::new();
        let received = Arc::new(AtomicU64::new(0));
        let sink = Box::new(CollectingSink {
            received: received.clone(),
            fail_until: 2,
            attempts: 0,
        });
        let stats = Arc::new(SinkStats::default());
        let mut cfg = config("s2");
        cfg.retry.attempts = 3;
        cfg.retry.base_interval_ms = 5;
        let runtime = SinkRuntime::new(sink, cfg, bus.clone(), stats);
        runtime.init().await.unwrap();
        runtime.start().await.unwrap();

        let point = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        bus.publish("iot.data.d1.temp", &point).await.unwrap();
        // batch_size is 2, so force a time-based flush with a single point.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn full_inbound_buffer_drops_and_counts() {
        let bus = Bus::new();
        let received = Arc::new(AtomicU64::new(0));
        let sink = Box::new(CollectingSink {
            received: received.clone(),
            fail_until: 0,
            attempts: 0,
        });
        let mut cfg = config("s3");
        cfg.buffer_size = 1;
        cfg.batch_size = 100;
        let stats = Arc::new(SinkStats::default());
        let runtime = SinkRuntime::new(sink, cfg, bus.clone(), stats.clone());
        runtime.init().await.unwrap();
        runtime.start().await.unwrap();

        for i in 0..5i64 {
            let point = Point::new("d1", "temp", Value::Float(i as f64), i).unwrap();
            bus.publish("iot.data.d1.temp", &point).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stats.snapshot("s3").buffer_overflow_total > 0);

        runtime.stop().await.unwrap();
    }
}
