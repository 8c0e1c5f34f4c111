// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The pull-based metrics endpoint: `GET /metrics` on
//! `gateway.http_port`, returning the `{gateway, system, data, errors}`
//! JSON shape.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gateway_core::metrics::MetricsCore;
use gateway_runtime::{AdapterRuntime, SinkRuntime};

pub struct MetricsState {
    pub gateway_id: String,
    pub metrics: Arc<MetricsCore>,
    pub adapters: Vec<Arc<AdapterRuntime>>,
    pub sinks: Vec<Arc<SinkRuntime>>,
}

#[derive(Debug, Serialize)]
struct GatewayBlock {
    id: String,
    status: &'static str,
    uptime_seconds: u64,
    version: &'static str,
    total_sinks: usize,
    running_sinks: usize,
    total_adapters: usize,
    running_adapters: usize,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    cpu_usage_percent: f64,
    memory_usage_bytes: u64,
    heap_size_bytes: u64,
    heap_in_use_bytes: u64,
    goroutine_count: u64,
    gc_pause_ms: f64,
    network_in_bytes: u64,
    network_out_bytes: u64,
}

#[derive(Debug, Serialize)]
struct DataBlock {
    data_points_per_second: f64,
    bytes_per_second: f64,
    average_latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorsBlock {
    errors_per_second: f64,
    error_rate: f64,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    gateway: GatewayBlock,
    system: SystemBlock,
    data: DataBlock,
    errors: ErrorsBlock,
    rules: JsonValue,
    adapters: JsonValue,
    sinks: JsonValue,
}

pub fn router(state: Arc<MetricsState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: healthy as long as no adapter or sink has gone
/// `Unhealthy`. Unlike `/metrics`, this never fails to serialize and is
/// meant for a process supervisor, not an operator dashboard.
async fn healthz_handler(State(state): State<Arc<MetricsState>>) -> Json<JsonValue> {
    let unhealthy_adapters = state.adapters.iter().filter(|a| a.health() == gateway_core::Health::Unhealthy).count();
    let unhealthy_sinks = state.sinks.iter().filter(|s| s.health() == gateway_core::Health::Unhealthy).count();
    let healthy = unhealthy_adapters == 0 && unhealthy_sinks == 0;

    Json(serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "unhealthy_adapters": unhealthy_adapters,
        "unhealthy_sinks": unhealthy_sinks,
    }))
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> Json<JsonValue> {
    let snapshot = state.metrics.snapshot();

    let running_adapters = state.adapters.iter().filter(|a| a.health() != gateway_core::Health::Unhealthy).count();
    let running_sinks = state.sinks.iter().filter(|s| s.health() != gateway_core::Health::Unhealthy).count();

    let points_total: u64 = snapshot.adapters.values().map(|a| a.points_produced).sum();
    let average_latency_ms = if snapshot.adapters.is_empty() {
        0.0
    } else {
        snapshot.adapters.values().map(|a| a.average_latency_us).sum::<f64>() / snapshot.adapters.len() as f64 / 1000.0
    };
    let errors_total: u64 =
        snapshot.adapters.values().map(|a| a.errors).sum::<u64>() + snapshot.sinks.values().map(|s| s.points_failed).sum::<u64>();
    let uptime = snapshot.uptime_seconds.max(1);

    let response = MetricsResponse {
        gateway: GatewayBlock {
            id: state.gateway_id.clone(),
            status: "running",
            uptime_seconds: snapshot.uptime_seconds,
            version: env!("CARGO_PKG_VERSION"),
            total_sinks: state.sinks.len(),
            running_sinks,
            total_adapters: state.adapters.len(),
            running_adapters,
        },
        system: SystemBlock {
            cpu_usage_percent: 0.0,
            memory_usage_bytes: snapshot.resources.memory_usage_bytes,
            heap_size_bytes: snapshot.resources.memory_usage_bytes,
            heap_in_use_bytes: snapshot.resources.memory_usage_bytes,
            goroutine_count: snapshot.resources.thread_count,
            gc_pause_ms: 0.0,
            network_in_bytes: 0,
            network_out_bytes: 0,
        },
        data: DataBlock {
            data_points_per_second: points_total as f64 / uptime as f64,
            bytes_per_second: 0.0,
            average_latency_ms,
        },
        errors: ErrorsBlock {
            errors_per_second: errors_total as f64 / uptime as f64,
            error_rate: snapshot.rules.error_rate,
        },
        rules: serde_json::to_value(&snapshot.rules).unwrap_or(JsonValue::Null),
        adapters: serde_json::to_value(&snapshot.adapters).unwrap_or(JsonValue::Null),
        sinks: serde_json::to_value(&snapshot.sinks).unwrap_or(JsonValue::Null),
    };

    Json(serde_json::to_value(&response).unwrap_or(JsonValue::Null))
}
