//! The query executor seam.
//!
//! A [`QueryExecutor`] runs SQL text with bound parameters against a
//! warehouse and returns the full result as a [`Table`]. The result cache
//! only ever talks to this trait.

use std::io;

use thiserror::Error;

use crate::params::Params;
use crate::table::Table;

/// Errors raised by query executors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("query failed: {0}")]
    Failed(String),

    #[error("maximum bytes billed exceeded (cap {limit:?}): {message}")]
    BytesBilledExceeded { limit: Option<u64>, message: String },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unreadable query output: {0}")]
    Output(String),
}

/// One query execution: SQL text, parameters and execution context.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    /// SQL text to run.
    pub sql: &'a str,
    /// Named parameters referenced as `@name` in the SQL.
    pub params: &'a Params,
    /// Target project; executor default when `None`.
    pub project: Option<&'a str>,
    /// Target location/region; executor default when `None`.
    pub location: Option<&'a str>,
    /// Abort the query if it would bill more than this many bytes.
    pub max_bytes_billed: Option<u64>,
}

impl<'a> QueryRequest<'a> {
    pub fn new(sql: &'a str, params: &'a Params) -> Self {
        Self {
            sql,
            params,
            project: None,
            location: None,
            max_bytes_billed: None,
        }
    }

    pub fn with_project(mut self, project: Option<&'a str>) -> Self {
        self.project = project;
        self
    }

    pub fn with_location(mut self, location: Option<&'a str>) -> Self {
        self.location = location;
        self
    }

    pub fn with_max_bytes_billed(mut self, max_bytes_billed: Option<u64>) -> Self {
        self.max_bytes_billed = max_bytes_billed;
        self
    }
}

/// Runs SQL against a warehouse.
pub trait QueryExecutor {
    /// Execute the request and return the complete result.
    fn execute(&self, request: &QueryRequest<'_>) -> Result<Table, ExecutorError>;
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for &T {
    fn execute(&self, request: &QueryRequest<'_>) -> Result<Table, ExecutorError> {
        (**self).execute(request)
    }
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for Box<T> {
    fn execute(&self, request: &QueryRequest<'_>) -> Result<Table, ExecutorError> {
        (**self).execute(request)
    }
}
