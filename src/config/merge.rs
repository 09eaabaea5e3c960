//! Layer merging
//!
//! - Objects: deep-merge by key
//! - Arrays and scalars: last layer wins
//! - Null: overrides (an explicit null unsets a default)

use serde_json::{Map, Value};

/// Deep merge `overlay` onto `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in order; the last layer has the highest precedence.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

/// Set `value` at a dotted key path, creating intermediate objects.
///
/// A non-object found on the way is replaced by an object.
pub fn insert_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let mut parts = path.split('.').peekable();

    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };

        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(json!({"cache": {"ttl_hours": 24}}), json!({"cache": {"ttl_hours": 1}}));
        assert_eq!(result["cache"]["ttl_hours"], 1);
    }

    #[test]
    fn test_sections_deep_merge() {
        let base = json!({
            "cache": {"dir": "./data"},
            "warehouse": {"location": "EU", "bq_binary": "bq"}
        });
        let overlay = json!({
            "warehouse": {"location": "US"}
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["warehouse"]["location"], "US");
        assert_eq!(result["warehouse"]["bq_binary"], "bq");
        assert_eq!(result["cache"]["dir"], "./data");
    }

    #[test]
    fn test_null_unsets() {
        let result = deep_merge(json!({"cache": {"ttl_hours": 24}}), json!({"cache": {"ttl_hours": null}}));
        assert!(result["cache"]["ttl_hours"].is_null());
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"warehouse": {"location": "EU"}, "cache": {"dir": "./data"}});
        let file = json!({"warehouse": {"location": "US", "project": "from-file"}});
        let env = json!({"warehouse": {"project": "from-env"}});
        let cli = json!({"warehouse": {"location": "asia-northeast1"}});

        let result = merge_layers(vec![builtin, file, env, cli]);

        assert_eq!(result["warehouse"]["location"], "asia-northeast1");
        assert_eq!(result["warehouse"]["project"], "from-env");
        assert_eq!(result["cache"]["dir"], "./data");
    }

    #[test]
    fn test_insert_path_builds_objects() {
        let mut value = Value::Null;
        insert_path(&mut value, "cache.ttl_hours", json!(6));
        insert_path(&mut value, "cache.dir", json!("/srv/cache"));
        insert_path(&mut value, "warehouse.project", json!("p1"));

        assert_eq!(
            value,
            json!({
                "cache": {"ttl_hours": 6, "dir": "/srv/cache"},
                "warehouse": {"project": "p1"}
            })
        );
    }

    #[test]
    fn test_insert_path_replaces_scalar_parent() {
        let mut value = json!({"cache": "oops"});
        insert_path(&mut value, "cache.dir", json!("./data"));
        assert_eq!(value["cache"]["dir"], "./data");
    }
}
