// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink-level filter rules, evaluated before a decoded point reaches the
//! inbound buffer. Non-matching messages are dropped
//! without size metrics but with a counter.

use gateway_core::config::{FilterAction, FilterOperator, FilterRuleConfig};
use gateway_core::Point;
use regex::Regex;
use serde_json::Value as JsonValue;

/// Resolve a dotted field path against a point: plain attributes
/// (`device_id`, `key`, `quality`, `value`) plus `tags.<name>`.
fn field_value(point: &Point, field: &str) -> Option<JsonValue> {
    if let Some(tag_name) = field.strip_prefix("tags.") {
        return point.get_tag(tag_name).map(JsonValue::String);
    }
    match field {
        "device_id" => Some(JsonValue::String(point.device_id().to_string())),
        "key" => Some(JsonValue::String(point.key().to_string())),
        "quality" => Some(JsonValue::from(point.quality)),
        "value" => point.value.as_f64().map(JsonValue::from).or_else(|| {
            point
                .value
                .as_str()
                .map(|s| JsonValue::String(s.to_string()))
        }),
        _ => None,
    }
}

fn operator_matches(operator: FilterOperator, actual: &JsonValue, expected: &JsonValue) -> bool {
    match operator {
        FilterOperator::Eq => actual == expected,
        FilterOperator::Ne => actual != expected,
        FilterOperator::Gt => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => a > e,
            _ => false,
        },
        FilterOperator::Lt => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => a < e,
            _ => false,
        },
        FilterOperator::Contains => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.contains(e),
            _ => false,
        },
        FilterOperator::Regex => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(pattern)) => Regex::new(pattern).map(|re| re.is_match(a)).unwrap_or(false),
            _ => false,
        },
    }
}

/// `true` means "keep the point"; `false` means "drop it".
pub fn apply_filters(point: &Point, filters: &[FilterRuleConfig]) -> bool {
    for rule in filters {
        let actual = match field_value(point, &rule.field) {
            Some(v) => v,
            None => continue,
        };
        let matched = operator_matches(rule.operator, &actual, &rule.value);
        let keep = match rule.action {
            FilterAction::Include => matched,
            FilterAction::Exclude => !matched,
        };
        if !keep {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Value;
    use serde_json::json;

    fn point() -> Point {
        let p = Point::new("d1", "temp", Value::Float(42.0), 0).unwrap();
        p.add_tag("site", "roof");
        p
    }

    #[test]
    fn include_rule_keeps_matching() {
        let rules = vec![FilterRuleConfig {
            field: "key".into(),
            operator: FilterOperator::Eq,
            value: json!("temp"),
            action: FilterAction::Include,
        }];
        assert!(apply_filters(&point(), &rules));
    }

    #[test]
    fn exclude_rule_drops_matching() {
        let rules = vec![FilterRuleConfig {
            field: "key".into(),
            operator: FilterOperator::Eq,
            value: json!("temp"),
            action: FilterAction::Exclude,
        }];
        assert!(!apply_filters(&point(), &rules));
    }

    #[test]
    fn tag_field_access() {
        let rules = vec![FilterRuleConfig {
            field: "tags.site".into(),
            operator: FilterOperator::Eq,
            value: json!("roof"),
            action: FilterAction::Include,
        }];
        assert!(apply_filters(&point(), &rules));
    }

    #[test]
    fn gt_operator_numeric() {
        let rules = vec![FilterRuleConfig {
            field: "value".into(),
            operator: FilterOperator::Gt,
            value: json!(10.0),
            action: FilterAction::Include,
        }];
        assert!(apply_filters(&point(), &rules));
    }
}
