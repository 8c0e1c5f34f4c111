// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Northbound sink implementations registered into the plugin registry's
//! `SinkFactory` map at startup.

pub mod file_sink;
pub mod http_sink;
pub mod influx;
pub mod log_sink;
pub mod memory_sink;
pub mod mqtt_sink;

pub use file_sink::FileSink;
pub use http_sink::HttpSink;
pub use influx::InfluxSink;
pub use log_sink::LogSink;
pub use memory_sink::{MemorySink, MemoryStore};
pub use mqtt_sink::MqttSink;

/// Register every in-tree sink type under its `type` name. Callers needing only a subset register factories
/// directly against [`gateway_core::registry::SinkRegistry`] instead.
pub fn register_all(registry: &gateway_core::registry::SinkRegistry) {
    registry.register("log", Box::new(|| Box::new(LogSink::new())));
    registry.register("memory", Box::new(|| Box::new(MemorySink::new())));
    registry.register("file", Box::new(|| Box::new(FileSink::new())));
    registry.register("http", Box::new(|| Box::new(HttpSink::new())));
    registry.register("mqtt", Box::new(|| Box::new(MqttSink::new())));
    registry.register("influx", Box::new(|| Box::new(InfluxSink::new())));
}
