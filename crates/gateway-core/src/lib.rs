// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point model, plugin factory registry, metrics core, and shared error
//! and configuration types for the IoT edge gateway's data-plane runtime.

pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod point;
pub mod queue;
pub mod registry;

pub use error::{CoreError, GatewayError};
pub use metrics::MetricsCore;
pub use plugin::{Adapter, AdapterFactory, CancelHandle, Health, OverflowPolicy, PluginState, Sink, SinkFactory};
pub use point::{Color, GenericVector, Location, Matrix, Point, Tags, TimeSeries, Value, ValueType, Vector3};
pub use queue::BoundedQueue;
pub use registry::{AdapterRegistry, PluginRegistry, SinkRegistry};
