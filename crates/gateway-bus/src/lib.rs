// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process subject-addressed pub/sub fabric connecting adapters, the
//! rules engine, and sinks.

pub mod bus;
pub mod subject;
pub mod subscription;

pub use bus::{Bus, BusError, SubscribeOptions, DEFAULT_SUBSCRIPTION_CAPACITY};
pub use subscription::{BusPayload, DeliveryPolicy, Handler, HandlerFuture, Subscription};

/// Reserved subject prefixes.
pub mod subjects {
    pub fn data(device_id: &str, key: &str) -> String {
        format!("iot.data.{device_id}.{key}")
    }

    pub fn data_wildcard() -> &'static str {
        "iot.data.>"
    }

    pub fn rule(rule_id: &str) -> String {
        format!("iot.rules.{rule_id}")
    }

    pub fn alert(level: &str) -> String {
        format!("iot.alerts.{level}")
    }

    pub fn system(event: &str) -> String {
        format!("iot.system.{event}")
    }
}
