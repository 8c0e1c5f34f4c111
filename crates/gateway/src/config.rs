// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The top-level configuration document: `gateway`,
//! `adapters`, `sinks`, and `rule_engine` sections. Lives in the binary
//! crate since it owns the YAML file and CLI wiring; the fragments every
//! other crate needs live in `gateway_core::config`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use gateway_core::config::SinkConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "fatal"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },

    #[error("{0}")]
    Invalid(String),
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "embedded".to_string()
}

fn default_max_connections() -> u32 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    pub id: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub https_port: Option<u16>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    #[serde(default)]
    pub plugins_dir: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub params: JsonValue,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitoringSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub metrics_retention_secs: Option<u64>,
    #[serde(default)]
    pub error_retention_secs: Option<u64>,
}

fn default_rules_dir() -> String {
    "rules".to_string()
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_rule_batch_size() -> usize {
    10
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

fn default_max_rules() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_rule_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

impl Default for RuleEngineSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_dir: default_rules_dir(),
            worker_pool_size: default_worker_pool_size(),
            batch_size: default_rule_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_rules: default_max_rules(),
            monitoring: MonitoringSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub rule_engine: RuleEngineSection,
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: GatewayConfig = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate. Invalid configuration
    /// must abort startup with a human-readable message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.id.is_empty() {
            return Err(ConfigError::Invalid("gateway.id must not be empty".into()));
        }
        if self.gateway.http_port == 0 {
            return Err(ConfigError::Invalid("gateway.http_port must be in 1..65535".into()));
        }
        if let Some(https_port) = self.gateway.https_port {
            if https_port == 0 {
                return Err(ConfigError::Invalid("gateway.https_port must be in 1..65535".into()));
            }
        }
        if !LOG_LEVELS.contains(&self.gateway.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "gateway.log_level must be one of {LOG_LEVELS:?}, got {:?}",
                self.gateway.log_level
            )));
        }
        for adapter in &self.adapters {
            if adapter.name.is_empty() {
                return Err(ConfigError::Invalid("adapter name must not be empty".into()));
            }
            if adapter.type_name.is_empty() {
                return Err(ConfigError::Invalid(format!("adapter {} is missing a type", adapter.name)));
            }
        }
        for sink in &self.sinks {
            sink.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// `tracing`'s level filter has no `fatal`; the enumerated config level
    /// maps it onto `error`.
    pub fn tracing_filter(&self) -> &str {
        match self.gateway.log_level.as_str() {
            "fatal" => "error",
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> GatewayConfig {
        GatewayConfig {
            gateway: GatewaySection {
                id: "gw1".into(),
                http_port: 8080,
                https_port: None,
                log_level: "info".into(),
                nats_url: "embedded".into(),
                plugins_dir: None,
                max_connections: 1000,
                read_timeout_ms: 30_000,
                write_timeout_ms: 30_000,
            },
            adapters: vec![],
            sinks: vec![],
            rule_engine: RuleEngineSection::default(),
        }
    }

    #[test]
    fn rejects_empty_gateway_id() {
        let mut config = minimal();
        config.gateway.id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = minimal();
        config.gateway.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_http_port() {
        let mut config = minimal();
        config.gateway.http_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_minimal_config() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn fatal_log_level_maps_to_error_filter() {
        let mut config = minimal();
        config.gateway.log_level = "fatal".into();
        assert_eq!(config.tracing_filter(), "error");
    }
}
