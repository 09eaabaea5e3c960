//! volu-bq - cached BigQuery analytics queries
//!
//! Runs parameterized SQL files through the `bq` CLI and keeps each result
//! on disk, keyed by a fingerprint of the SQL, its parameters and the
//! warehouse context, so repeated analysis runs do not re-bill the same
//! query.

pub mod app;
pub mod bq;
pub mod config;
pub mod error;
pub mod logging;

pub use app::{load_config, open_cache, open_cache_with, render_csv, AnalysisQuery, Overrides};
pub use bq::{BqCliExecutor, BqError};
pub use config::{ConfigError, EffectiveConfig, EnvLayer, Settings};
pub use error::{AppError, AppResult};
