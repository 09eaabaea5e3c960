//! Environment layer (layer 3)
//!
//! Maps a fixed set of environment variables onto config keys. Variables
//! are passed in explicitly; only the binary reads the process
//! environment.

use serde_json::Value;

use super::effective::ConfigError;
use super::merge::insert_path;

/// Whether a variable holds text or an unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Unsigned,
}

/// (variable, config key, kind)
const MAPPINGS: &[(&str, &str, Kind)] = &[
    ("CACHE_DIR", "cache.dir", Kind::Text),
    ("CACHE_TTL_HOURS", "cache.ttl_hours", Kind::Unsigned),
    ("CACHE_LOCK_TIMEOUT_SECONDS", "cache.lock_timeout_seconds", Kind::Unsigned),
    ("GCP_PROJECT", "warehouse.project", Kind::Text),
    ("BQ_LOCATION", "warehouse.location", Kind::Text),
    ("MAX_BYTES_BILLED", "warehouse.max_bytes_billed", Kind::Unsigned),
    ("BQ_BINARY", "warehouse.bq_binary", Kind::Text),
];

/// Config values taken from environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvLayer {
    /// (variable, config key, value) in mapping order
    entries: Vec<(String, String, Value)>,
}

impl EnvLayer {
    /// Build from `(name, value)` pairs.
    ///
    /// Unknown variables are ignored and empty values count as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: Vec<(K, V)> = vars.into_iter().collect();
        let mut entries = Vec::new();

        for (name, key, kind) in MAPPINGS {
            let Some(raw) = vars
                .iter()
                .rev()
                .find(|(k, _)| k.as_ref() == *name)
                .map(|(_, v)| v.as_ref().trim())
            else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }

            let value = match kind {
                Kind::Text => Value::String(raw.to_string()),
                Kind::Unsigned => raw.parse::<u64>().map(Value::from).map_err(|_| {
                    ConfigError::Parse(format!(
                        "{} must be a non-negative integer, got '{}'",
                        name, raw
                    ))
                })?,
            };
            entries.push((name.to_string(), key.to_string(), value));
        }

        Ok(Self { entries })
    }

    /// Read the current process environment.
    pub fn from_process() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the variables that contributed.
    pub fn variables(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _, _)| name.clone()).collect()
    }

    /// Convert to a JSON Value for merging.
    pub fn to_value(&self) -> Value {
        let mut value = Value::Object(Default::default());
        for (_, key, v) in &self.entries {
            insert_path(&mut value, key, v.clone());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_maps_known_variables() {
        let layer = EnvLayer::from_vars([
            ("GCP_PROJECT", "p1"),
            ("BQ_LOCATION", "US"),
            ("CACHE_TTL_HOURS", "24"),
            ("MAX_BYTES_BILLED", "1000000"),
            ("HOME", "/home/analyst"),
        ])
        .unwrap();

        assert_eq!(
            layer.to_value(),
            json!({
                "cache": {"ttl_hours": 24},
                "warehouse": {"project": "p1", "location": "US", "max_bytes_billed": 1000000}
            })
        );
        assert_eq!(
            layer.variables(),
            vec!["CACHE_TTL_HOURS", "GCP_PROJECT", "BQ_LOCATION", "MAX_BYTES_BILLED"]
        );
    }

    #[test]
    fn test_empty_values_are_unset() {
        let layer = EnvLayer::from_vars([("GCP_PROJECT", ""), ("CACHE_TTL_HOURS", "  ")]).unwrap();
        assert!(layer.is_empty());
        assert_eq!(layer.to_value(), json!({}));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = EnvLayer::from_vars([("CACHE_TTL_HOURS", "a day")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("CACHE_TTL_HOURS"));

        assert!(EnvLayer::from_vars([("MAX_BYTES_BILLED", "-5")]).is_err());
    }

    #[test]
    fn test_last_duplicate_wins() {
        let layer =
            EnvLayer::from_vars(vec![("CACHE_DIR".to_string(), "/a".to_string()), ("CACHE_DIR".to_string(), "/b".to_string())])
                .unwrap();
        assert_eq!(layer.to_value()["cache"]["dir"], "/b");
    }
}
