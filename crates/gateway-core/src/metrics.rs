// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide metrics collector.
//!
//! Hot fields (totals, failed) are atomic counters; the one string-valued
//! field (`last_error`) is guarded by a short-lived `parking_lot::Mutex`,
//! matching the concurrency policy spec.md §5 mandates for sink
//! statistics. Rates are derived, not stored: each snapshot divides the
//! delta since the previous snapshot by the elapsed wall time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Running statistics for a single adapter instance.
#[derive(Default)]
pub struct AdapterStats {
    pub points_produced: AtomicU64,
    pub errors: AtomicU64,
    last_produce_time_ms: AtomicI64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
    pub drops: AtomicU64,
}

impl AdapterStats {
    pub fn record_produced(&self, latency_us: u64) {
        self.points_produced.fetch_add(1, Ordering::Relaxed);
        self.last_produce_time_ms.store(now_millis(), Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn average_latency_us(&self) -> f64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            0.0
        } else {
            self.total_latency_us.load(Ordering::Relaxed) as f64 / samples as f64
        }
    }

    pub fn snapshot(&self, name: &str) -> AdapterStatsSnapshot {
        AdapterStatsSnapshot {
            name: name.to_string(),
            points_produced: self.points_produced.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            last_produce_time_ms: self.last_produce_time_ms.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatsSnapshot {
    pub name: String,
    pub points_produced: u64,
    pub errors: u64,
    pub drops: u64,
    pub last_produce_time_ms: i64,
    pub average_latency_us: f64,
}

/// Running statistics for a single sink instance.
#[derive(Default)]
pub struct SinkStats {
    pub points_total: AtomicU64,
    pub points_failed: AtomicU64,
    pub buffer_overflow_total: AtomicU64,
    pub filtered_total: AtomicU64,
    last_publish_time_ms: AtomicI64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SinkStats {
    pub fn record_success(&self, count: u64, latency_us: u64) {
        self.points_total.fetch_add(count, Ordering::Relaxed);
        self.last_publish_time_ms.store(now_millis(), Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, count: u64, error: impl Into<String>) {
        self.points_failed.fetch_add(count, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.into());
    }

    pub fn record_overflow(&self) {
        self.buffer_overflow_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn average_latency_us(&self) -> f64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            0.0
        } else {
            self.total_latency_us.load(Ordering::Relaxed) as f64 / samples as f64
        }
    }

    pub fn snapshot(&self, name: &str) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            name: name.to_string(),
            points_total: self.points_total.load(Ordering::Relaxed),
            points_failed: self.points_failed.load(Ordering::Relaxed),
            buffer_overflow_total: self.buffer_overflow_total.load(Ordering::Relaxed),
            filtered_total: self.filtered_total.load(Ordering::Relaxed),
            last_publish_time_ms: self.last_publish_time_ms.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
            last_error: self.last_error(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkStatsSnapshot {
    pub name: String,
    pub points_total: u64,
    pub points_failed: u64,
    pub buffer_overflow_total: u64,
    pub filtered_total: u64,
    pub last_publish_time_ms: i64,
    pub average_latency_us: f64,
    pub last_error: Option<String>,
}

/// Rule-engine-wide totals.
#[derive(Default)]
pub struct RuleEngineStats {
    pub rules_total: AtomicU64,
    pub rules_enabled: AtomicU64,
    pub matches_total: AtomicU64,
    pub non_matches_total: AtomicU64,
    pub condition_errors_total: AtomicU64,
    pub actions_executed: AtomicU64,
    pub action_errors: AtomicU64,
    total_processing_ns: AtomicU64,
    processing_samples: AtomicU64,
}

impl RuleEngineStats {
    pub fn record_evaluation(&self, matched: bool, elapsed_ns: u64) {
        if matched {
            self.matches_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.non_matches_total.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.processing_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_condition_error(&self) {
        self.condition_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action(&self, ok: bool) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.action_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn average_processing_us(&self) -> f64 {
        let samples = self.processing_samples.load(Ordering::Relaxed);
        if samples == 0 {
            0.0
        } else {
            (self.total_processing_ns.load(Ordering::Relaxed) as f64 / samples as f64) / 1000.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.actions_executed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.action_errors.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> RuleEngineStatsSnapshot {
        RuleEngineStatsSnapshot {
            rules_total: self.rules_total.load(Ordering::Relaxed),
            rules_enabled: self.rules_enabled.load(Ordering::Relaxed),
            matches_total: self.matches_total.load(Ordering::Relaxed),
            non_matches_total: self.non_matches_total.load(Ordering::Relaxed),
            condition_errors_total: self.condition_errors_total.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            average_processing_us: self.average_processing_us(),
            error_rate: self.error_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleEngineStatsSnapshot {
    pub rules_total: u64,
    pub rules_enabled: u64,
    pub matches_total: u64,
    pub non_matches_total: u64,
    pub condition_errors_total: u64,
    pub actions_executed: u64,
    pub average_processing_us: f64,
    pub error_rate: f64,
}

/// A point-in-time reading of process resource usage. Best-effort: reads
/// `/proc/self/status` on Linux; falls back to zeroed fields elsewhere
/// rather than pulling in a platform-sampling dependency.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSample {
    pub memory_usage_bytes: u64,
    pub thread_count: u64,
}

fn sample_resources() -> ResourceSample {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let mut sample = ResourceSample::default();
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest.split_whitespace().next() {
                        sample.memory_usage_bytes = kb.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if let Some(rest) = line.strip_prefix("Threads:") {
                    sample.thread_count = rest.trim().parse().unwrap_or(0);
                }
            }
            return sample;
        }
    }
    ResourceSample::default()
}

/// Process-wide metrics collector. Initialized once at startup alongside
/// the plugin registry.
pub struct MetricsCore {
    start_time: Instant,
    adapters: DashMap<String, Arc<AdapterStats>>,
    sinks: DashMap<String, Arc<SinkStats>>,
    pub rules: RuleEngineStats,
    pub aggregate_count: AtomicU64,
}

impl MetricsCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            adapters: DashMap::new(),
            sinks: DashMap::new(),
            rules: RuleEngineStats::default(),
            aggregate_count: AtomicU64::new(0),
        })
    }

    pub fn adapter(&self, name: &str) -> Arc<AdapterStats> {
        self.adapters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AdapterStats::default()))
            .clone()
    }

    pub fn sink(&self, name: &str) -> Arc<SinkStats> {
        self.sinks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SinkStats::default()))
            .clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let adapters: HashMap<String, AdapterStatsSnapshot> = self
            .adapters
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot(e.key())))
            .collect();
        let sinks: HashMap<String, SinkStatsSnapshot> = self
            .sinks
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot(e.key())))
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            adapters,
            sinks,
            rules: self.rules.snapshot(),
            aggregate_count: self.aggregate_count.load(Ordering::Relaxed),
            resources: sample_resources(),
        }
    }
}

impl Default for MetricsCore {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            adapters: DashMap::new(),
            sinks: DashMap::new(),
            rules: RuleEngineStats::default(),
            aggregate_count: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub adapters: HashMap<String, AdapterStatsSnapshot>,
    pub sinks: HashMap<String, SinkStatsSnapshot>,
    pub rules: RuleEngineStatsSnapshot,
    pub aggregate_count: u64,
    pub resources: ResourceSample,
}
