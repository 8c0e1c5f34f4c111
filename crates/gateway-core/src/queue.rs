// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A small bounded, policy-aware queue shared by the adapter outbound path
//! and the sink inbound buffer. Built as a plain
//! `Mutex<VecDeque<T>>` + `Notify` rather than `tokio::sync::mpsc` because
//! the overflow policy needs to evict from the *front* of the queue
//! (drop-oldest), which an mpsc channel's sender half cannot do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::plugin::OverflowPolicy;

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    not_full: Notify,
    not_empty: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    default_policy: OverflowPolicy,
}

/// A bounded queue applying one of [`OverflowPolicy`]'s three disciplines
/// on enqueue. Cloning shares the same underlying buffer (it is a handle,
/// like `mpsc::Sender`).
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::DropNewest)
    }

    /// Create a queue that remembers a default overflow policy, so callers
    /// (e.g. an adapter implementation) can use [`BoundedQueue::push`]
    /// without re-threading the policy through every call site.
    pub fn with_policy(capacity: usize, default_policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
                capacity: capacity.max(1),
                not_full: Notify::new(),
                not_empty: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                default_policy,
            }),
        }
    }

    /// Enqueue using this queue's stored default policy.
    pub async fn push(&self, item: T) -> bool {
        self.enqueue(item, self.inner.default_policy).await
    }

    /// Enqueue applying `policy`. Returns `true` if the item was accepted
    /// (always true for `Block`, which instead waits for space).
    pub async fn enqueue(&self, item: T, policy: OverflowPolicy) -> bool {
        match policy {
            OverflowPolicy::DropNewest => {
                let mut queue = self.inner.queue.lock();
                if queue.len() >= self.inner.capacity {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                queue.push_back(item);
                drop(queue);
                self.inner.not_empty.notify_one();
                true
            }
            OverflowPolicy::DropOldest => {
                let mut queue = self.inner.queue.lock();
                if queue.len() >= self.inner.capacity {
                    queue.pop_front();
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(item);
                drop(queue);
                self.inner.not_empty.notify_one();
                true
            }
            OverflowPolicy::Block => {
                loop {
                    {
                        let mut queue = self.inner.queue.lock();
                        if queue.len() < self.inner.capacity {
                            queue.push_back(item);
                            drop(queue);
                            self.inner.not_empty.notify_one();
                            return true;
                        }
                    }
                    if self.inner.closed.load(Ordering::Acquire) {
                        return false;
                    }
                    self.inner.not_full.notified().await;
                }
            }
        }
    }

    /// Always-non-blocking enqueue that drops the incoming item when full
    /// (used by the sink inbound buffer, which "never blocks the bus").
    pub fn try_enqueue(&self, item: T) -> bool {
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(item);
        drop(queue);
        self.inner.not_empty.notify_one();
        true
    }

    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(item) = queue.pop_front() {
                    drop(queue);
                    self.inner.not_full.notify_one();
                    return Some(item);
                }
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.not_empty.notified().await;
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_newest_rejects_when_full() {
        let q = BoundedQueue::new(2);
        assert!(q.enqueue(1, OverflowPolicy::DropNewest).await);
        assert!(q.enqueue(2, OverflowPolicy::DropNewest).await);
        assert!(!q.enqueue(3, OverflowPolicy::DropNewest).await);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn drop_oldest_evicts_front() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        q.enqueue(1, OverflowPolicy::DropOldest).await;
        q.enqueue(2, OverflowPolicy::DropOldest).await;
        q.enqueue(3, OverflowPolicy::DropOldest).await;
        assert_eq!(q.recv().await, Some(2));
        assert_eq!(q.recv().await, Some(3));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_when_drained() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        q.try_enqueue(1);
        q.close();
        assert_eq!(q.recv().await, Some(1));
        assert_eq!(q.recv().await, None);
    }
}
