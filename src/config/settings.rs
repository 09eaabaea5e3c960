//! Typed settings read from a validated [`EffectiveConfig`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use volu_cache::CacheConfig;

use super::effective::{ConfigError, EffectiveConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub cache_dir: PathBuf,
    /// `None`: entries never expire
    pub ttl_hours: Option<u64>,
    /// `None`: no per-fingerprint locking
    pub lock_timeout: Option<Duration>,
    pub project: Option<String>,
    pub location: String,
    pub max_bytes_billed: Option<u64>,
    pub bq_binary: String,
}

impl Settings {
    pub(crate) fn from_config(config: &EffectiveConfig) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            config
                .get_str(key)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::Validation(format!("{} is not set", key)))
        };

        Ok(Self {
            cache_dir: PathBuf::from(required("cache.dir")?),
            ttl_hours: config.get_u64("cache.ttl_hours"),
            lock_timeout: config
                .get_u64("cache.lock_timeout_seconds")
                .map(Duration::from_secs),
            project: config
                .get_str("warehouse.project")
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            location: required("warehouse.location")?,
            max_bytes_billed: config.get_u64("warehouse.max_bytes_billed"),
            bq_binary: required("warehouse.bq_binary")?,
        })
    }

    /// Cache construction parameters.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            cache_root: self.cache_dir.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, EnvLayer};

    #[test]
    fn test_default_settings() {
        let settings = EffectiveConfig::build(ConfigFile::None, &EnvLayer::default(), None)
            .unwrap()
            .settings()
            .unwrap();

        assert_eq!(settings.cache_dir, PathBuf::from("./data"));
        assert_eq!(settings.ttl_hours, None);
        assert_eq!(settings.lock_timeout, None);
        assert_eq!(settings.project, None);
        assert_eq!(settings.location, "EU");
        assert_eq!(settings.max_bytes_billed, None);
        assert_eq!(settings.bq_binary, "bq");
    }

    #[test]
    fn test_settings_from_env() {
        let env = EnvLayer::from_vars([
            ("CACHE_DIR", "/srv/volu"),
            ("CACHE_TTL_HOURS", "6"),
            ("CACHE_LOCK_TIMEOUT_SECONDS", "30"),
            ("GCP_PROJECT", "p1"),
        ])
        .unwrap();
        let settings = EffectiveConfig::build(ConfigFile::None, &env, None)
            .unwrap()
            .settings()
            .unwrap();

        assert_eq!(settings.ttl_hours, Some(6));
        assert_eq!(settings.project.as_deref(), Some("p1"));

        let cache = settings.cache_config();
        assert_eq!(cache.cache_root, PathBuf::from("/srv/volu"));
        assert_eq!(cache.lock_timeout, Some(Duration::from_secs(30)));
    }
}
