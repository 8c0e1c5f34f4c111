// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-subscription delivery buffer, handler dispatch, and the worker task
//! that drains it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// The payload carried on the bus. Every producer serializes its own
/// in-memory structure to JSON before publishing (design note: "avoid
/// sharing mutable Point instances across stages").
pub type BusPayload = Arc<serde_json::Value>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler = Arc<dyn Fn(BusPayload) -> HandlerFuture + Send + Sync>;

/// Backpressure policy applied when a subscription's delivery buffer is
/// full. Default is drop-oldest-and-count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    Block,
    DropOldest,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        DeliveryPolicy::DropOldest
    }
}

pub(crate) struct Inner {
    queue: Mutex<VecDeque<BusPayload>>,
    capacity: usize,
    policy: DeliveryPolicy,
    notify: Notify,
    closed: AtomicBool,
    pub(crate) delivered: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) panics: AtomicU64,
}

/// A live subscription handle. Unsubscribing (dropping the handle or
/// calling [`Subscription::unsubscribe`]) is idempotent: the worker task
/// exits on the next wakeup once `closed` is observed.
#[derive(Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub pattern: String,
    pub queue_group: Option<String>,
    pub(crate) inner: Arc<Inner>,
}

impl Subscription {
    pub(crate) fn new(
        id: Uuid,
        pattern: String,
        queue_group: Option<String>,
        capacity: usize,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            id,
            pattern,
            queue_group,
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
                capacity,
                policy,
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                panics: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a payload for delivery, applying the backpressure policy.
    /// Returns `true` if the message was accepted (queued or would block),
    /// `false` if it was dropped.
    pub(crate) fn enqueue(&self, payload: BusPayload) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            match self.inner.policy {
                DeliveryPolicy::DropOldest => {
                    queue.pop_front();
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryPolicy::Block => {
                    // Single-process bus: "blocking" is approximated by
                    // still accepting past capacity rather than making the
                    // publisher's task wait on a lock indefinitely, which
                    // would risk deadlocking a publish that fans out to
                    // several subscriptions. The subscription's queue is
                    // allowed to grow; callers relying on true backpressure
                    // should keep handlers fast.
                }
            }
        }
        queue.push_back(payload);
        drop(queue);
        self.inner.notify.notify_one();
        true
    }

    pub fn unsubscribe(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the bus-owned worker task draining this subscription's buffer
    /// into `handler`. Handler panics are caught per-message via
    /// `tokio::spawn` + `JoinError::is_panic`, counted, and never abort the
    /// worker loop or other subscriptions.
    pub(crate) fn spawn_worker(&self, handler: Handler) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut queue = inner.queue.lock();
                    queue.pop_front()
                };
                match next {
                    Some(payload) => {
                        inner.delivered.fetch_add(1, Ordering::Relaxed);
                        let fut = (handler)(payload);
                        if let Err(join_err) = tokio::spawn(fut).await {
                            if join_err.is_panic() {
                                inner.panics.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!("bus handler panicked");
                            }
                        }
                    }
                    None => {
                        if inner.closed.load(Ordering::Acquire) {
                            return;
                        }
                        inner.notify.notified().await;
                        if inner.closed.load(Ordering::Acquire) && inner.queue.lock().is_empty() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_counts_drops_at_capacity() {
        let sub = Subscription::new(Uuid::new_v4(), "a.b".into(), None, 2, DeliveryPolicy::DropOldest);
        assert!(sub.enqueue(Arc::new(serde_json::json!(1))));
        assert!(sub.enqueue(Arc::new(serde_json::json!(2))));
        assert!(sub.enqueue(Arc::new(serde_json::json!(3))));
        assert_eq!(sub.dropped_count(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let sub = Subscription::new(Uuid::new_v4(), "a.b".into(), None, 2, DeliveryPolicy::DropOldest);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(sub.is_closed());
        assert!(!sub.enqueue(Arc::new(serde_json::json!(1))));
    }
}
