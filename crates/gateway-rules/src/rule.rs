// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The rule document: id, priority, condition, and ordered action list
//!.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use gateway_core::config::RetryConfig;

use crate::action::ActionConfig;
use crate::condition::Condition;

fn default_priority() -> i32 {
    0
}

fn default_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// Execution metadata every action entry carries regardless of its type
///.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionMeta {
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub conditions: Option<Condition>,
}

/// One entry in a rule's action list: the shared envelope flattened
/// alongside the type-tagged action body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    #[serde(flatten)]
    pub meta: ActionMeta,
    #[serde(flatten)]
    pub config: ActionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_version")]
    pub version: u32,
    pub condition: Condition,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl Rule {
    /// Ordering key for dispatch: higher priority first, stable ties
    /// broken by rule id.
    pub fn dispatch_key(&self) -> (std::cmp::Reverse<i32>, &str) {
        (std::cmp::Reverse(self.priority), self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_rule_document() {
        let json = serde_json::json!({
            "id": "r1",
            "name": "hot",
            "condition": {"simple": {"field": "value", "operator": "gt", "value": 30}},
            "actions": [
                {"type": "transform", "sub_type": "scale", "factor": 2.0}
            ]
        });
        let rule: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.actions.len(), 1);
        assert!(!rule.actions[0].meta.is_async);
    }

    #[test]
    fn dispatch_key_orders_by_priority_then_id() {
        let mut rules = vec![
            Rule {
                id: "b".into(),
                name: "b".into(),
                enabled: true,
                priority: 5,
                version: 1,
                condition: Condition::Expression("true".into()),
                actions: vec![],
                tags: HashMap::new(),
                created_at: None,
                updated_at: None,
            },
            Rule {
                id: "a".into(),
                name: "a".into(),
                enabled: true,
                priority: 5,
                version: 1,
                condition: Condition::Expression("true".into()),
                actions: vec![],
                tags: HashMap::new(),
                created_at: None,
                updated_at: None,
            },
            Rule {
                id: "c".into(),
                name: "c".into(),
                enabled: true,
                priority: 10,
                version: 1,
                condition: Condition::Expression("true".into()),
                actions: vec![],
                tags: HashMap::new(),
                created_at: None,
                updated_at: None,
            },
        ];
        rules.sort_by(|a, b| a.dispatch_key().cmp(&b.dispatch_key()));
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
