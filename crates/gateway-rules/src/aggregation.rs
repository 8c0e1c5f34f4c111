// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Keyed aggregation state store: one exclusive-update
//! path per `(rule_id, group_key)`, many readers, scaling with the number
//! of distinct keys rather than the number of rules.
//!
//! Numeric stability choice: cumulative mode (`window_size == 0`) keeps O(1)
//! incremental moments (`count`, `sum`, `sum_of_squares`) and therefore
//! cannot support order-statistics or outlier functions, which need the
//! retained sample set. Windowed mode (`window_size > 0`) keeps a bounded
//! ring buffer and recomputes `sum`/`sum_of_squares`/`min`/`max` from that
//! buffer on every update — O(window_size) instead of O(1), but immune to
//! the catastrophic-cancellation risk of subtracting an expiring sample
//! from a running sum of squares. Order-statistics and threshold/outlier
//! functions are only available in windowed mode; asking for them in
//! cumulative mode yields `None`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

fn composite_key(rule_id: &str, group_key: &str) -> String {
    format!("{rule_id}\u{0}{group_key}")
}

struct AggEntry {
    window_size: usize,
    buffer: VecDeque<f64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    first: f64,
    last: f64,
    prev_last: Option<f64>,
    prev_update: Option<Instant>,
    null_count: u64,
    last_update: Instant,
    ttl: Duration,
}

impl AggEntry {
    fn new(window_size: usize, ttl: Duration) -> Self {
        Self {
            window_size,
            buffer: VecDeque::new(),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            first: 0.0,
            last: 0.0,
            prev_last: None,
            prev_update: None,
            null_count: 0,
            last_update: Instant::now(),
            ttl,
        }
    }

    fn update(&mut self, value: Option<f64>) {
        self.last_update = Instant::now();
        let Some(v) = value else {
            self.null_count += 1;
            return;
        };

        if self.count == 0 {
            self.first = v;
        }
        self.prev_last = Some(self.last);
        self.prev_update = Some(self.last_update);
        self.last = v;

        if self.window_size > 0 {
            self.buffer.push_back(v);
            while self.buffer.len() > self.window_size {
                self.buffer.pop_front();
            }
            self.recompute_from_buffer();
        } else {
            self.count += 1;
            self.sum += v;
            self.sum_sq += v * v;
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
    }

    /// Two-pass recompute from the retained window, avoiding the
    /// cancellation risk of an incremental subtract-on-expiry update.
    fn recompute_from_buffer(&mut self) {
        self.count = self.buffer.len() as u64;
        self.sum = self.buffer.iter().sum();
        let mean = self.sum / self.count as f64;
        self.sum_sq = self.buffer.iter().map(|v| (v - mean).powi(2)).sum::<f64>() + self.count as f64 * mean * mean;
        self.min = self.buffer.iter().cloned().fold(f64::INFINITY, f64::min);
        self.max = self.buffer.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        if self.window_size > 0 {
            let mean = self.mean();
            self.buffer.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.count as f64
        } else {
            (self.sum_sq / self.count as f64 - self.mean().powi(2)).max(0.0)
        }
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        if self.window_size == 0 || self.buffer.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.buffer.iter().cloned().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = (p / 100.0) * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        if lower == upper {
            Some(sorted[lower])
        } else {
            let frac = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
        }
    }

    fn above_count(&self, threshold: f64) -> Option<u64> {
        if self.window_size == 0 {
            return None;
        }
        Some(self.buffer.iter().filter(|v| **v > threshold).count() as u64)
    }

    fn below_count(&self, threshold: f64) -> Option<u64> {
        if self.window_size == 0 {
            return None;
        }
        Some(self.buffer.iter().filter(|v| **v < threshold).count() as u64)
    }

    fn in_range_count(&self, min: f64, max: f64) -> Option<u64> {
        if self.window_size == 0 {
            return None;
        }
        Some(self.buffer.iter().filter(|v| **v >= min && **v <= max).count() as u64)
    }

    fn outlier_count(&self) -> Option<u64> {
        if self.window_size == 0 || self.buffer.len() < 2 {
            return None;
        }
        let mean = self.mean();
        let stddev = self.variance().sqrt();
        if stddev == 0.0 {
            return Some(0);
        }
        Some(self.buffer.iter().filter(|v| ((**v - mean) / stddev).abs() > 3.0).count() as u64)
    }

    fn change(&self) -> f64 {
        self.last - self.prev_last.unwrap_or(self.last)
    }

    fn change_rate(&self) -> f64 {
        match self.prev_update {
            Some(prev) => {
                let elapsed = self.last_update.saturating_duration_since(prev).as_secs_f64();
                if elapsed > 0.0 {
                    self.change() / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_update) >= self.ttl
    }
}

/// Resolved value of one requested aggregate function, or `None` when the
/// function isn't available for the entry's mode (see module docs).
pub struct AggregateResult {
    pub values: Vec<(String, Option<f64>)>,
    pub count: u64,
    pub window_size: usize,
}

/// Extra parameters some aggregate functions need beyond the buffer
/// itself.
#[derive(Debug, Clone, Default)]
pub struct AggregateParams {
    pub above_threshold: Option<f64>,
    pub below_threshold: Option<f64>,
    pub in_range: Option<(f64, f64)>,
}

pub struct AggregationManager {
    states: DashMap<String, Mutex<AggEntry>>,
}

impl AggregationManager {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    pub fn update(&self, rule_id: &str, group_key: &str, value: Option<f64>, window_size: usize, ttl: Duration) {
        let key = composite_key(rule_id, group_key);
        let entry = self.states.entry(key).or_insert_with(|| Mutex::new(AggEntry::new(window_size, ttl)));
        entry.lock().update(value);
    }

    pub fn compute(
        &self,
        rule_id: &str,
        group_key: &str,
        functions: &[String],
        params: &AggregateParams,
    ) -> Option<AggregateResult> {
        let key = composite_key(rule_id, group_key);
        let entry = self.states.get(&key)?;
        let state = entry.lock();

        let values = functions
            .iter()
            .map(|name| {
                let v = match name.as_str() {
                    "count" => Some(state.count as f64),
                    "sum" => Some(state.sum),
                    "avg" | "mean" => Some(state.mean()),
                    "min" => (state.count > 0).then_some(state.min),
                    "max" => (state.count > 0).then_some(state.max),
                    "first" => (state.count > 0).then_some(state.first),
                    "last" => (state.count > 0).then_some(state.last),
                    "variance" => Some(state.variance()),
                    "stddev" => Some(state.variance().sqrt()),
                    "median" => state.percentile(50.0),
                    "p25" => state.percentile(25.0),
                    "p50" => state.percentile(50.0),
                    "p75" => state.percentile(75.0),
                    "p90" => state.percentile(90.0),
                    "p95" => state.percentile(95.0),
                    "p99" => state.percentile(99.0),
                    "above_count" => params.above_threshold.and_then(|t| state.above_count(t)).map(|n| n as f64),
                    "below_count" => params.below_threshold.and_then(|t| state.below_count(t)).map(|n| n as f64),
                    "in_range_count" => params.in_range.and_then(|(lo, hi)| state.in_range_count(lo, hi)).map(|n| n as f64),
                    "outlier_count" => state.outlier_count().map(|n| n as f64),
                    "change" => Some(state.change()),
                    "change_rate" => Some(state.change_rate()),
                    "null_count" => Some(state.null_count as f64),
                    _ => None,
                };
                (name.clone(), v)
            })
            .collect();

        Some(AggregateResult { values, count: state.count, window_size: state.window_size })
    }

    /// Reclaim entries whose `last_update + ttl < now`.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.states.retain(|_, entry| !entry.lock().is_expired(now));
    }

    /// Forced cleanup matching an optional `rule_id`/`group_key` prefix
    /// and/or an age cutoff.
    pub fn clear_matching(&self, rule_id: Option<&str>, group_key: Option<&str>, older_than: Option<Duration>) {
        let now = Instant::now();
        self.states.retain(|key, entry| {
            let mut parts = key.splitn(2, '\u{0}');
            let key_rule = parts.next().unwrap_or("");
            let key_group = parts.next().unwrap_or("");
            if let Some(r) = rule_id {
                if key_rule != r {
                    return true;
                }
            }
            if let Some(g) = group_key {
                if key_group != g {
                    return true;
                }
            }
            if let Some(age) = older_than {
                if now.saturating_duration_since(entry.lock().last_update) < age {
                    return true;
                }
            }
            false
        });
    }
}

impl Default for AggregationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_mode_tracks_basic_moments() {
        let mgr = AggregationManager::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            mgr.update("r1", "g1", Some(v), 0, Duration::from_secs(60));
        }
        let result = mgr.compute("r1", "g1", &["count".into(), "sum".into(), "avg".into()], &AggregateParams::default()).unwrap();
        assert_eq!(result.values[0].1, Some(4.0));
        assert_eq!(result.values[1].1, Some(10.0));
        assert_eq!(result.values[2].1, Some(2.5));
    }

    #[test]
    fn windowed_mode_supports_median_and_drops_oldest() {
        let mgr = AggregationManager::new();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            mgr.update("r1", "g1", Some(v), 3, Duration::from_secs(60));
        }
        // window retains [3, 4, 5]
        let result = mgr.compute("r1", "g1", &["median".into(), "count".into(), "min".into(), "max".into()], &AggregateParams::default()).unwrap();
        assert_eq!(result.values[0].1, Some(4.0));
        assert_eq!(result.values[1].1, Some(3.0));
        assert_eq!(result.values[2].1, Some(3.0));
        assert_eq!(result.values[3].1, Some(5.0));
    }

    #[test]
    fn cumulative_mode_has_no_median() {
        let mgr = AggregationManager::new();
        mgr.update("r1", "g1", Some(1.0), 0, Duration::from_secs(60));
        let result = mgr.compute("r1", "g1", &["median".into()], &AggregateParams::default()).unwrap();
        assert_eq!(result.values[0].1, None);
    }

    #[test]
    fn change_tracks_delta_between_updates() {
        let mgr = AggregationManager::new();
        mgr.update("r1", "g1", Some(10.0), 0, Duration::from_secs(60));
        mgr.update("r1", "g1", Some(15.0), 0, Duration::from_secs(60));
        let result = mgr.compute("r1", "g1", &["change".into()], &AggregateParams::default()).unwrap();
        assert_eq!(result.values[0].1, Some(5.0));
    }

    #[test]
    fn sweep_reclaims_expired_entries() {
        let mgr = AggregationManager::new();
        mgr.update("r1", "g1", Some(1.0), 0, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        mgr.sweep();
        assert!(mgr.compute("r1", "g1", &["count".into()], &AggregateParams::default()).is_none());
    }
}
