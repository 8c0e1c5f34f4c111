// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batching buffer for a sink's accumulated points: accumulate until
//! either `max_size` is reached or `flush_interval` elapses since the
//! last flush.

use std::time::{Duration, Instant};

use gateway_core::Point;

pub struct BatchBuffer {
    points: Vec<Point>,
    max_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl BatchBuffer {
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        Self {
            points: Vec::with_capacity(max_size.max(1)),
            max_size: max_size.max(1),
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Add a point. Returns `Some(batch)` if the buffer just filled up.
    pub fn add(&mut self, point: Point) -> Option<Vec<Point>> {
        self.points.push(point);
        if self.points.len() >= self.max_size {
            Some(self.flush())
        } else {
            None
        }
    }

    pub fn should_flush(&self) -> bool {
        !self.points.is_empty() && self.last_flush.elapsed() >= self.flush_interval
    }

    pub fn flush(&mut self) -> Vec<Point> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Duration until the next time-based flush is due, used to size the
    /// dispatch loop's sleep between polls.
    pub fn time_until_flush(&self) -> Duration {
        if self.points.is_empty() {
            self.flush_interval
        } else {
            self.flush_interval
                .checked_sub(self.last_flush.elapsed())
                .unwrap_or(Duration::ZERO)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Value;

    fn pt(i: i64) -> Point {
        Point::new("d1", "temp", Value::Float(i as f64), i).unwrap()
    }

    #[test]
    fn flushes_at_max_size() {
        let mut buf = BatchBuffer::new(2, Duration::from_secs(60));
        assert!(buf.add(pt(1)).is_none());
        let batch = buf.add(pt(2)).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn time_based_flush_due_immediately_with_zero_interval() {
        let mut buf = BatchBuffer::new(100, Duration::from_millis(0));
        buf.add(pt(1));
        assert!(buf.should_flush());
        assert_eq!(buf.flush().len(), 1);
    }

    #[test]
    fn empty_buffer_never_needs_flush() {
        let buf = BatchBuffer::new(10, Duration::from_millis(0));
        assert!(!buf.should_flush());
    }
}
