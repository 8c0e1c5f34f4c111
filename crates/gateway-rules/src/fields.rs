// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dotted field access over a [`Point`]: plain attributes, `tags.<name>`,
//! and compound-value subfields such as `value.lat` or `value.x`
//!.
//!
//! Note: the original spec text names compound subfields `location.latitude`
//! / `location.longitude`; this implementation exposes the same data one
//! level down, as `value.lat` / `value.lon`, matching the actual field
//! names `gateway_core::point::Location` carries. See DESIGN.md.

use gateway_core::{Point, Value};
use serde_json::Value as JsonValue;

/// Resolve `path` against `point`. Returns `None` when the path has no
/// corresponding field rather than erroring, so callers can decide how to
/// treat a missing field (non-match for conditions, `null` for templates).
pub fn resolve(point: &Point, path: &str) -> Option<JsonValue> {
    if let Some(tag) = path.strip_prefix("tags.") {
        return point.get_tag(tag).map(JsonValue::String);
    }

    let mut parts = path.splitn(2, '.');
    let head = parts.next().unwrap_or("");
    let rest = parts.next();

    match head {
        "device_id" => Some(JsonValue::String(point.device_id().to_string())),
        "key" => Some(JsonValue::String(point.key().to_string())),
        "timestamp" => Some(JsonValue::from(point.timestamp)),
        "quality" => Some(JsonValue::from(point.quality)),
        "value" => match rest {
            None => scalar_value(&point.value),
            Some(sub) => compound_subfield(&point.value, sub),
        },
        _ => None,
    }
}

/// The scalar JSON representation of a [`Value`], for bare-attribute
/// access (`value` with no subfield).
fn scalar_value(value: &Value) -> Option<JsonValue> {
    match value {
        Value::Integer(i) => Some(JsonValue::from(*i)),
        Value::Float(f) => Some(JsonValue::from(*f)),
        Value::Boolean(b) => Some(JsonValue::from(*b)),
        Value::String(s) => Some(JsonValue::String(s.clone())),
        other => serde_json::to_value(other).ok(),
    }
}

/// Subfield access into a compound value, e.g. `value.lat`, `value.x`,
/// `value.r`. Returns `None` for shapes with no such field.
fn compound_subfield(value: &Value, sub: &str) -> Option<JsonValue> {
    match value {
        Value::Location(loc) => match sub {
            "lat" => Some(JsonValue::from(loc.lat)),
            "lon" => Some(JsonValue::from(loc.lon)),
            "alt" => loc.alt.map(JsonValue::from),
            "speed" => loc.speed.map(JsonValue::from),
            "heading" => loc.heading.map(JsonValue::from),
            _ => None,
        },
        Value::Vector3(v) => match sub {
            "x" => Some(JsonValue::from(v.x)),
            "y" => Some(JsonValue::from(v.y)),
            "z" => Some(JsonValue::from(v.z)),
            _ => None,
        },
        Value::Color(gateway_core::Color::Rgb { r, g, b }) => match sub {
            "r" => Some(JsonValue::from(*r)),
            "g" => Some(JsonValue::from(*g)),
            "b" => Some(JsonValue::from(*b)),
            _ => None,
        },
        Value::Color(gateway_core::Color::Hsl { h, s, l }) => match sub {
            "h" => Some(JsonValue::from(*h)),
            "s" => Some(JsonValue::from(*s)),
            "l" => Some(JsonValue::from(*l)),
            _ => None,
        },
        Value::GenericVector(gv) => match sub {
            "unit" => gv.unit.clone().map(JsonValue::String),
            "len" | "length" => Some(JsonValue::from(gv.values.len())),
            _ => None,
        },
        Value::Matrix(m) => match sub {
            "rows" => Some(JsonValue::from(m.rows)),
            "cols" => Some(JsonValue::from(m.cols)),
            _ => None,
        },
        _ => None,
    }
}

/// Best-effort coercion of a resolved field to `f64`, used by numeric
/// operators and the expression evaluator.
pub fn as_f64(value: &JsonValue) -> Option<f64> {
    value.as_f64().or_else(|| {
        if let JsonValue::Bool(b) = value {
            Some(if *b { 1.0 } else { 0.0 })
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{Location, Vector3};

    #[test]
    fn resolves_plain_attributes() {
        let p = Point::new("d1", "temp", Value::Float(21.5), 100).unwrap();
        assert_eq!(resolve(&p, "device_id"), Some(JsonValue::String("d1".into())));
        assert_eq!(resolve(&p, "key"), Some(JsonValue::String("temp".into())));
        assert_eq!(resolve(&p, "value"), Some(JsonValue::from(21.5)));
    }

    #[test]
    fn resolves_tag_access() {
        let p = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
        p.add_tag("site", "roof");
        assert_eq!(resolve(&p, "tags.site"), Some(JsonValue::String("roof".into())));
        assert_eq!(resolve(&p, "tags.missing"), None);
    }

    #[test]
    fn resolves_compound_subfields() {
        let loc = Value::Location(Location {
            lat: 1.5,
            lon: 2.5,
            alt: None,
            speed: None,
            heading: None,
        });
        let p = Point::new("d1", "gps", loc, 0).unwrap();
        assert_eq!(resolve(&p, "value.lat"), Some(JsonValue::from(1.5)));
        assert_eq!(resolve(&p, "value.alt"), None);

        let vec3 = Value::Vector3(Vector3 { x: 1.0, y: 2.0, z: 3.0 });
        let p2 = Point::new("d1", "accel", vec3, 0).unwrap();
        assert_eq!(resolve(&p2, "value.y"), Some(JsonValue::from(2.0)));
    }
}
