// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Southbound adapter implementations registered into the plugin
//! registry's `AdapterFactory` map at startup.

pub mod mock;
pub mod process;

pub use mock::MockAdapter;
pub use process::ProcessAdapter;

/// Register every in-tree adapter type under its `type` name
/// (`adapters[].type`). `Adapter::name` on the constructed instance is a
/// placeholder until `AdapterRuntime` assigns the configured instance
/// name; callers needing an adapter to report its true name immediately
/// register a factory directly against
/// [`gateway_core::registry::AdapterRegistry`] instead.
pub fn register_all(registry: &gateway_core::registry::AdapterRegistry) {
    registry.register("mock", Box::new(|| Box::new(MockAdapter::new("mock"))));
    registry.register("process", Box::new(|| Box::new(ProcessAdapter::new("process"))));
}
