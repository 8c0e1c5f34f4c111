// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The subject-addressed pub/sub fabric.
//!
//! Single process, in-memory; the design intentionally keeps subject
//! semantics identical to what an embedded or co-located NATS-style broker
//! would provide, so a future external-broker backend is a drop-in swap
//! behind the same `Bus` API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::subject::{self, matches};
use crate::subscription::{BusPayload, DeliveryPolicy, Handler, Subscription};

pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

struct QueueGroupState {
    members: RwLock<Vec<Uuid>>,
    round_robin: AtomicUsize,
}

/// Options controlling a single `subscribe` call.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    pub capacity: usize,
    pub policy: DeliveryPolicy,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            policy: DeliveryPolicy::DropOldest,
        }
    }
}

/// In-process message bus. Handlers run on bus-owned worker tasks, never
/// on the publisher's task; publish delivery to each
/// matching subscription's buffer is synchronous and serialized by
/// `dispatch_lock` so FIFO per-subject ordering holds across concurrent
/// publishers.
pub struct Bus {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    groups: RwLock<HashMap<(String, String), Arc<QueueGroupState>>>,
    dispatch_lock: tokio::sync::Mutex<()>,
    published_total: std::sync::atomic::AtomicU64,
    no_subscriber_total: std::sync::atomic::AtomicU64,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            dispatch_lock: tokio::sync::Mutex::new(()),
            published_total: std::sync::atomic::AtomicU64::new(0),
            no_subscriber_total: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Publish a JSON-serializable payload on `subject`. Publishing with no
    /// subscribers is a no-op success.
    pub async fn publish<T: Serialize>(&self, subject: &str, payload: &T) -> Result<(), BusError> {
        if !subject::is_valid_subject(subject) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let value: BusPayload = Arc::new(serde_json::to_value(payload)?);
        self.publish_value(subject, value).await;
        Ok(())
    }

    pub(crate) async fn publish_value(&self, subject: &str, value: BusPayload) {
        let _guard = self.dispatch_lock.lock().await;
        self.published_total.fetch_add(1, Ordering::Relaxed);

        let subs = self.subscriptions.read();
        let groups = self.groups.read();

        let mut delivered_any = false;

        for sub in subs.values() {
            if sub.queue_group.is_none() && matches(&sub.pattern, subject) {
                delivered_any |= sub.enqueue(value.clone());
            }
        }

        for ((pattern, _group), state) in groups.iter() {
            if !matches(pattern, subject) {
                continue;
            }
            let members = state.members.read();
            if members.is_empty() {
                continue;
            }
            let mut attempts = 0;
            while attempts < members.len() {
                let idx = state.round_robin.fetch_add(1, Ordering::Relaxed) % members.len();
                if let Some(sub) = subs.get(&members[idx]) {
                    if !sub.is_closed() {
                        delivered_any |= sub.enqueue(value.clone());
                        break;
                    }
                }
                attempts += 1;
            }
        }

        if !delivered_any {
            self.no_subscriber_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Subscribe `handler` to `pattern`. Returns a handle whose lifetime is
    /// bounded by the subscriber's own lifetime; dropping it without
    /// calling `unsubscribe` leaves the worker task running, so callers
    /// that own the handle are expected to call `unsubscribe` explicitly
    /// rather than relying on `Drop`.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        if !subject::is_valid_pattern(pattern) {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        let id = Uuid::new_v4();
        let sub = Subscription::new(id, pattern.to_string(), None, options.capacity, options.policy);
        sub.spawn_worker(handler);
        self.subscriptions.write().insert(id, sub.clone());
        Ok(sub)
    }

    /// Subscribe as a member of `group`; each published message matching
    /// `pattern` is delivered to exactly one member of the group
    /// (round-robin), independent of any plain subscriptions on
    /// overlapping patterns.
    pub fn queue_subscribe(
        &self,
        pattern: &str,
        group: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        if !subject::is_valid_pattern(pattern) {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        let id = Uuid::new_v4();
        let sub = Subscription::new(
            id,
            pattern.to_string(),
            Some(group.to_string()),
            options.capacity,
            options.policy,
        );
        sub.spawn_worker(handler);
        self.subscriptions.write().insert(id, sub.clone());

        let key = (pattern.to_string(), group.to_string());
        let mut groups = self.groups.write();
        let state = groups.entry(key).or_insert_with(|| {
            Arc::new(QueueGroupState {
                members: RwLock::new(Vec::new()),
                round_robin: AtomicUsize::new(0),
            })
        });
        state.members.write().push(id);

        Ok(sub)
    }

    /// Unsubscribe by id; idempotent.
    pub fn unsubscribe(&self, id: Uuid) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            sub.unsubscribe();
        }
        for state in self.groups.read().values() {
            state.members.write().retain(|m| *m != id);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }

    pub fn no_subscriber_total(&self) -> u64 {
        self.no_subscriber_total.load(Ordering::Relaxed)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            dispatch_lock: tokio::sync::Mutex::new(()),
            published_total: std::sync::atomic::AtomicU64::new(0),
            no_subscriber_total: std::sync::atomic::AtomicU64::new(0),
        }
    }
}
