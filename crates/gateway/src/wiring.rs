// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builds the running gateway from a parsed [`crate::config::GatewayConfig`]:
//! registers in-tree plugin factories, instantiates adapters and the
//! (possibly nested) sink tree, and loads rule documents from
//! `rule_engine.rules_dir`.

use std::path::Path;
use std::sync::Arc;

use gateway_bus::Bus;
use gateway_core::config::SinkConfig;
use gateway_core::metrics::MetricsCore;
use gateway_core::registry::PluginRegistry;
use gateway_core::GatewayError;
use gateway_rules::engine::RuleEngine;
use gateway_rules::rule::Rule;
use gateway_runtime::{AdapterRuntime, AdapterRuntimeOptions, SinkRuntime};

use crate::config::{AdapterConfig, GatewayConfig};

pub fn build_registry() -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();
    gateway_adapters::register_all(&registry.adapters);
    gateway_sinks::register_all(&registry.sinks);
    registry
}

pub async fn build_adapters(
    configs: &[AdapterConfig],
    registry: &PluginRegistry,
    bus: &Arc<Bus>,
    metrics: &Arc<MetricsCore>,
) -> Result<Vec<Arc<AdapterRuntime>>, GatewayError> {
    let mut runtimes = Vec::new();
    for cfg in configs {
        if !cfg.enabled {
            continue;
        }
        let adapter = registry.adapters.create(&cfg.type_name)?;
        let runtime = AdapterRuntime::new(
            cfg.name.clone(),
            cfg.type_name.clone(),
            adapter,
            bus.clone(),
            metrics.adapter(&cfg.name),
            AdapterRuntimeOptions::default(),
        );
        runtime.init(cfg.params.clone()).await?;
        runtimes.push(runtime);
    }
    Ok(runtimes)
}

/// Build one sink's runtime, recursing into `target_sinks` first.
fn build_sink_runtime(
    config: &SinkConfig,
    registry: &PluginRegistry,
    bus: &Arc<Bus>,
    metrics: &Arc<MetricsCore>,
) -> Result<Arc<SinkRuntime>, GatewayError> {
    let targets = config
        .target_sinks
        .iter()
        .map(|target| build_sink_runtime(target, registry, bus, metrics))
        .collect::<Result<Vec<_>, _>>()?;

    let sink = registry.sinks.create(&config.type_name)?;
    let runtime = SinkRuntime::new(sink, config.clone(), bus.clone(), metrics.sink(&config.name));
    Ok(runtime.with_targets(targets))
}

pub fn build_sinks(
    configs: &[SinkConfig],
    registry: &PluginRegistry,
    bus: &Arc<Bus>,
    metrics: &Arc<MetricsCore>,
) -> Result<Vec<Arc<SinkRuntime>>, GatewayError> {
    configs
        .iter()
        .filter(|c| c.enabled)
        .map(|cfg| build_sink_runtime(cfg, registry, bus, metrics))
        .collect()
}

/// Read every `*.json` rule document under `rules_dir`. A directory that doesn't exist yet is treated as an
/// empty rule set rather than a startup failure.
pub fn load_rule_documents(rules_dir: &str) -> Result<Vec<Rule>, GatewayError> {
    let dir = Path::new(rules_dir);
    if !dir.is_dir() {
        tracing::warn!(rules_dir, "rule_engine.rules_dir does not exist, starting with no rules");
        return Ok(Vec::new());
    }

    let mut rules = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(GatewayError::Io)?;
    for entry in entries {
        let entry = entry.map_err(GatewayError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(GatewayError::Io)?;
        let rule: Rule = serde_json::from_str(&text)
            .map_err(|e| GatewayError::ValidationError(format!("{}: {e}", path.display())))?;
        rules.push(rule);
    }
    Ok(rules)
}

pub async fn build_rule_engine(
    config: &GatewayConfig,
    bus: &Arc<Bus>,
    metrics: &Arc<MetricsCore>,
) -> Result<Option<Arc<RuleEngine>>, GatewayError> {
    if !config.rule_engine.enabled {
        return Ok(None);
    }
    let engine = RuleEngine::with_worker_pool_size(bus.clone(), metrics.clone(), config.rule_engine.worker_pool_size);
    let rules = load_rule_documents(&config.rule_engine.rules_dir)?;
    engine
        .load_rules(rules)
        .map_err(|e| GatewayError::ValidationError(e.to_string()))?;
    engine.start(Default::default()).await?;
    Ok(Some(engine))
}
