// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide type-name -> factory maps for adapters and sinks.
//!
//! Grounded directly on `SchemaRegistry`: a plain `HashMap` guarded by a
//! `parking_lot::RwLock`, additive registration, and a `Default` impl.
//! Generalized one step here to hold two registries (adapter, sink), each
//! keyed by a type-name string.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CoreError;
use crate::plugin::{Adapter, AdapterFactory, Sink, SinkFactory};

/// Type-name -> factory map for southbound adapters.
///
/// Registration must complete during process startup; after
/// the first `create` call the registry is effectively read-only, though
/// nothing here enforces that beyond convention, matching the registry's
/// "write-once/read-many" contract.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: RwLock<HashMap<String, AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: impl Into<String>, factory: AdapterFactory) {
        self.factories.write().insert(type_name.into(), factory);
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Adapter>, CoreError> {
        let guard = self.factories.read();
        let factory = guard
            .get(type_name)
            .ok_or_else(|| CoreError::PluginNotFound(type_name.to_string()))?;
        Ok(factory())
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }
}

/// Type-name -> factory map for northbound sinks. Mirrors
/// [`AdapterRegistry`] exactly; kept as a distinct type rather than a
/// generic over the role because the registry's `Create` signature differs
/// by return type and the two roles are never iterated together.
#[derive(Default)]
pub struct SinkRegistry {
    factories: RwLock<HashMap<String, SinkFactory>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: impl Into<String>, factory: SinkFactory) {
        self.factories.write().insert(type_name.into(), factory);
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Sink>, CoreError> {
        let guard = self.factories.read();
        let factory = guard
            .get(type_name)
            .ok_or_else(|| CoreError::PluginNotFound(type_name.to_string()))?;
        Ok(factory())
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }
}

/// Process-wide plugin registry bundling both roles. `init()` is the
/// lifecycle hook called exactly once before any plugin factory is
/// invoked; `teardown` (test-only) lets integration tests build a fresh
/// registry per test instead of sharing global state.
pub struct PluginRegistry {
    pub adapters: AdapterRegistry,
    pub sinks: SinkRegistry,
}

impl PluginRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            adapters: AdapterRegistry::new(),
            sinks: SinkRegistry::new(),
        })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self {
            adapters: AdapterRegistry::new(),
            sinks: SinkRegistry::new(),
        }
    }
}
