// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared configuration fragments referenced by more than one crate
//!. The top-level `GatewayConfig` document lives in the
//! `gateway` binary crate since it owns the YAML file and CLI wiring; the
//! fragments here are the ones `gateway-runtime` and `gateway-rules` need
//! without depending on the binary crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;

fn default_batch_size() -> usize {
    10
}

fn default_buffer_size() -> usize {
    1000
}

/// Per-sink standard configuration recognized by every sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub params: JsonValue,
    #[serde(default)]
    pub subscriptions: Vec<SinkSubscriptionConfig>,
    #[serde(default)]
    pub filters: Vec<FilterRuleConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub target_sinks: Vec<SinkConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidPoint("sink name must not be empty".into()));
        }
        if self.type_name.is_empty() {
            return Err(CoreError::InvalidPoint("sink type must not be empty".into()));
        }
        Ok(())
    }
}

/// `data_type` dictates how a subscription's raw bus payload is decoded
/// into a [`crate::point::Point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionDataType {
    Raw,
    Rule,
    Alert,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOverride {
    pub device_id: Option<String>,
    pub key: Option<String>,
    pub value_field: Option<String>,
    pub timestamp_field: Option<String>,
    #[serde(default)]
    pub static_tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSubscriptionConfig {
    pub subject: String,
    #[serde(default)]
    pub queue_group: Option<String>,
    pub data_type: SubscriptionDataType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub transform: Option<TransformOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRuleConfig {
    pub field: String,
    pub operator: FilterOperator,
    pub value: JsonValue,
    pub action: FilterAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Linear,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Linear
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
}

fn default_base_interval_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: BackoffKind::default(),
            base_interval_ms: default_base_interval_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before the `attempt`'th retry (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let ms = match self.backoff {
            BackoffKind::Linear => self.base_interval_ms * attempt as u64,
            BackoffKind::Exponential => self.base_interval_ms * 2u64.saturating_pow(attempt - 1),
        };
        std::time::Duration::from_millis(ms)
    }
}
