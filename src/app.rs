//! Glue between flags, configuration and the result cache.

use std::path::{Path, PathBuf};

use serde_json::Value;
use volu_cache::{CacheRequest, CsvCodec, ResultCache};
use volu_query::{parse_param_args, Params, QueryExecutor, Table};

use crate::bq::BqCliExecutor;
use crate::config::{insert_path, ConfigFile, EffectiveConfig, EnvLayer, Settings, DEFAULT_CONFIG_FILE};
use crate::error::AppResult;

/// Flags that override configuration keys (layer 4).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub ttl_hours: Option<u64>,
    pub project: Option<String>,
    pub location: Option<String>,
    pub max_bytes_billed: Option<u64>,
}

impl Overrides {
    /// `None` when no flag was given.
    pub fn to_value(&self) -> Option<Value> {
        let mut value = Value::Null;
        if let Some(dir) = &self.cache_dir {
            insert_path(&mut value, "cache.dir", dir.to_string_lossy().into());
        }
        if let Some(ttl) = self.ttl_hours {
            insert_path(&mut value, "cache.ttl_hours", ttl.into());
        }
        if let Some(project) = &self.project {
            insert_path(&mut value, "warehouse.project", project.as_str().into());
        }
        if let Some(location) = &self.location {
            insert_path(&mut value, "warehouse.location", location.as_str().into());
        }
        if let Some(cap) = self.max_bytes_billed {
            insert_path(&mut value, "warehouse.max_bytes_billed", cap.into());
        }
        (!value.is_null()).then_some(value)
    }
}

/// Merge all layers; an explicit `--config` file must exist.
pub fn load_config(
    config_path: Option<&Path>,
    env: &EnvLayer,
    overrides: &Overrides,
) -> AppResult<EffectiveConfig> {
    let file = match config_path {
        Some(path) => ConfigFile::Explicit(path),
        None => ConfigFile::Optional(Path::new(DEFAULT_CONFIG_FILE)),
    };
    Ok(EffectiveConfig::build(file, env, overrides.to_value())?)
}

/// One analysis query as named on the command line.
#[derive(Debug, Clone)]
pub struct AnalysisQuery {
    pub analysis: String,
    pub sql: PathBuf,
    pub params: Params,
    pub force_refresh: bool,
}

impl AnalysisQuery {
    pub fn new(
        analysis: impl Into<String>,
        sql: impl Into<PathBuf>,
        param_args: &[String],
    ) -> AppResult<Self> {
        Ok(Self {
            analysis: analysis.into(),
            sql: sql.into(),
            params: parse_param_args(param_args)?,
            force_refresh: false,
        })
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Cache request with the warehouse context and TTL from `settings`.
    pub fn request<'a>(&'a self, settings: &'a Settings) -> CacheRequest<'a> {
        CacheRequest::new(&self.analysis, &self.sql, &self.params)
            .with_project(settings.project.as_deref())
            .with_location(Some(settings.location.as_str()))
            .with_max_bytes_billed(settings.max_bytes_billed)
            .with_ttl_hours(settings.ttl_hours)
            .with_force_refresh(self.force_refresh)
    }
}

/// Result cache over the `bq` CLI as configured.
pub fn open_cache(settings: &Settings) -> ResultCache<BqCliExecutor> {
    open_cache_with(settings, BqCliExecutor::new(settings.bq_binary.clone()))
}

pub fn open_cache_with<E: QueryExecutor>(settings: &Settings, executor: E) -> ResultCache<E> {
    ResultCache::new(settings.cache_config(), executor)
}

/// Plain CSV bytes of a table, header first.
pub fn render_csv(table: &Table) -> AppResult<Vec<u8>> {
    Ok(CsvCodec.encode_plain(table)?)
}
