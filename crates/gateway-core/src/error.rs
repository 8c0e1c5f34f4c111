// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared error types for the gateway core and the crates that build on it.

use thiserror::Error;

/// Errors raised by the point model and plugin registry.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("plugin type not found: {0}")]
    PluginNotFound(String),

    #[error("plugin type already registered: {0}")]
    DuplicateRegistration(String),
}

/// The umbrella error type for call sites that bridge multiple gateway
/// subsystems (wiring code, the metrics endpoint, the CLI). Each subsystem
/// also exposes a narrower local error it converts `From` into this one at
/// its boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin init error: {0}")]
    PluginInitError(String),

    #[error("plugin start error: {0}")]
    PluginStartError(String),

    #[error("publish error: {0}")]
    PublishError(String),

    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("stop timeout: {0}")]
    StopTimeout(String),

    #[error("not running: {0}")]
    NotRunning(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
