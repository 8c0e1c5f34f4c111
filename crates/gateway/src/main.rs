// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The IoT edge gateway binary: loads a YAML configuration document,
//! wires adapters, sinks, and the rules engine onto a shared message
//! bus, serves the metrics endpoint, and runs until interrupted
//!.

mod config;
mod metrics_http;
mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::GatewayConfig;
use gateway_bus::Bus;
use gateway_core::metrics::MetricsCore;

/// IoT edge gateway
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "IoT edge gateway: southbound adapters, message bus, rules engine, northbound sinks")]
#[command(version)]
struct Args {
    /// Path to the gateway configuration document
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override gateway.log_level from the config file
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match GatewayConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let filter = args.log_level.as_deref().unwrap_or_else(|| config.tracing_filter());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start the async runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Startup(err)) => {
            tracing::error!(%err, "startup failed");
            ExitCode::from(2)
        }
        Err(RunError::Runtime(err)) => {
            tracing::error!(%err, "fatal runtime error");
            ExitCode::from(3)
        }
    }
}

enum RunError {
    Startup(gateway_core::GatewayError),
    Runtime(gateway_core::GatewayError),
}

async fn run(config: GatewayConfig) -> Result<(), RunError> {
    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let registry = wiring::build_registry();

    tracing::info!(id = %config.gateway.id, "starting gateway");

    let adapters = wiring::build_adapters(&config.adapters, &registry, &bus, &metrics)
        .await
        .map_err(RunError::Startup)?;
    let sinks = wiring::build_sinks(&config.sinks, &registry, &bus, &metrics).map_err(RunError::Startup)?;

    for sink in &sinks {
        sink.init().await.map_err(RunError::Startup)?;
    }
    for sink in &sinks {
        sink.start().await.map_err(RunError::Startup)?;
    }

    let rule_engine = wiring::build_rule_engine(&config, &bus, &metrics).await.map_err(RunError::Startup)?;

    for adapter in &adapters {
        adapter.start().await.map_err(RunError::Startup)?;
    }

    let metrics_state = Arc::new(metrics_http::MetricsState {
        gateway_id: config.gateway.id.clone(),
        metrics: metrics.clone(),
        adapters: adapters.clone(),
        sinks: sinks.clone(),
    });
    let app = metrics_http::router(metrics_state);
    let addr = format!("0.0.0.0:{}", config.gateway.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| RunError::Startup(e.into()))?;
    tracing::info!(%addr, "metrics endpoint listening on /metrics");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(%err, "metrics server exited");
        }
    });

    tokio::signal::ctrl_c().await.map_err(|e| RunError::Runtime(e.into()))?;
    tracing::info!("shutdown signal received, stopping gateway");

    server.abort();

    for adapter in &adapters {
        if let Err(err) = adapter.stop().await {
            tracing::warn!(adapter = %adapter.name(), %err, "adapter did not stop within its grace period");
        }
    }
    if let Some(engine) = &rule_engine {
        engine.stop().await;
    }
    for sink in &sinks {
        if let Err(err) = sink.stop().await {
            tracing::warn!(sink = %sink.name(), %err, "sink did not stop within its grace period");
        }
    }

    tracing::info!("gateway stopped cleanly");
    Ok(())
}
