//! Built-in defaults (layer 1)
//!
//! Keys with no default (`cache.ttl_hours`, `warehouse.project`, ...) are
//! simply absent from this layer.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Cache root (default: "./data")
    pub cache_dir: String,

    /// Query location (default: "EU")
    pub location: String,

    /// `bq` executable (default: "bq")
    pub bq_binary: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            cache_dir: "./data".to_string(),
            location: "EU".to_string(),
            bq_binary: "bq".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "cache": {
                "dir": self.cache_dir
            },
            "warehouse": {
                "location": self.location,
                "bq_binary": self.bq_binary
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.cache_dir, "./data");
        assert_eq!(defaults.location, "EU");
        assert_eq!(defaults.bq_binary, "bq");
    }

    #[test]
    fn test_to_value_leaves_optional_keys_absent() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["cache"]["dir"], "./data");
        assert_eq!(value["warehouse"]["location"], "EU");
        assert!(value["cache"].get("ttl_hours").is_none());
        assert!(value["warehouse"].get("project").is_none());
    }
}
