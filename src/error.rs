//! Top-level error for the CLI surface.

use std::io;

use thiserror::Error;
use volu_cache::{CacheError, CodecError};
use volu_query::ParamError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cannot render table: {0}")]
    Render(#[from] CodecError),

    #[error("cannot serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
