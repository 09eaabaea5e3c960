//! Effective configuration with full provenance
//!
//! The merged configuration object plus the list of layers that
//! contributed to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::env::EnvLayer;
use super::merge::merge_layers;
use super::settings::Settings;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "volu-bq/effective_config@1";

/// Config file picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "volu-bq.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Environment variables that contributed (env layer only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

impl ConfigSource {
    fn new(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
            variables: Vec::new(),
        }
    }
}

/// Where to look for the config file.
#[derive(Debug, Clone, Copy)]
pub enum ConfigFile<'a> {
    /// Must exist
    Explicit(&'a Path),
    /// Used if present
    Optional(&'a Path),
    None,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,

    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers:
    /// builtin → file → environment → CLI.
    pub fn build(
        file: ConfigFile<'_>,
        env: &EnvLayer,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource::new(ConfigOrigin::Builtin));

        // Layer 2: Config file
        let file_path = match file {
            ConfigFile::Explicit(path) => Some(path),
            ConfigFile::Optional(path) if path.exists() => Some(path),
            ConfigFile::Optional(_) | ConfigFile::None => None,
        };
        if let Some(path) = file_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
                ..ConfigSource::new(ConfigOrigin::File)
            });
        }

        // Layer 3: Environment
        if !env.is_empty() {
            layers.push(env.to_value());
            sources.push(ConfigSource {
                variables: env.variables(),
                ..ConfigSource::new(ConfigOrigin::Env)
            });
        }

        // Layer 4: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::new(ConfigOrigin::Cli));
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::Parse(format!("{}: invalid UTF-8: {}", path.display(), e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Validate configuration values
    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let get = |path: &str| {
            path.split('.')
                .try_fold(config, |current, part| current.get(part))
                .filter(|v| !v.is_null())
        };

        for key in ["cache.dir", "warehouse.location", "warehouse.bq_binary"] {
            match get(key).map(|v| v.as_str()) {
                Some(Some(s)) if !s.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "{} must be a non-empty string",
                        key
                    )))
                }
            }
        }

        if let Some(project) = get("warehouse.project") {
            if !project.is_string() {
                return Err(ConfigError::Validation(
                    "warehouse.project must be a string".to_string(),
                ));
            }
        }

        if let Some(ttl) = get("cache.ttl_hours") {
            if ttl.as_u64().is_none() {
                return Err(ConfigError::Validation(
                    "cache.ttl_hours must be a non-negative integer".to_string(),
                ));
            }
        }

        for key in ["cache.lock_timeout_seconds", "warehouse.max_bytes_billed"] {
            if let Some(value) = get(key) {
                if !matches!(value.as_u64(), Some(n) if n > 0) {
                    return Err(ConfigError::Validation(format!(
                        "{} must be a positive integer",
                        key
                    )));
                }
            }
        }

        Ok(())
    }

    /// Typed view of the validated configuration.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        Settings::from_config(self)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated); null counts as absent
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        (!current.is_null()).then_some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
