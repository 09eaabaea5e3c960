//! Query result cache
//!
//! `get_or_fetch` maps (analysis, SQL file, parameters, context) to a
//! table:
//! - fingerprint the request
//! - serve `<root>/<analysis>/cache/<fingerprint>.<ext>` if present and
//!   fresh under the request TTL
//! - otherwise run the query through the executor and store the result
//!
//! Executor errors propagate unchanged and leave the cache untouched.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use volu_query::{ExecutorError, Params, QueryExecutor, QueryRequest, Table};

use crate::codec::{CodecError, StorageFormat};
use crate::fingerprint::{Fingerprint, QueryContext, SqlSource};
use crate::freshness::{self, FreshnessPolicy};
use crate::lock::{EntryLock, LockError};
use crate::store::{StoredEntry, TableStore};

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot read SQL file {path}: {source}")]
    SqlSource {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("SQL file {0} is not valid UTF-8")]
    SqlEncoding(PathBuf),

    #[error("cannot canonicalize fingerprint inputs: {0}")]
    Canonicalize(String),

    #[error("invalid analysis name '{0}': must be a single path component")]
    InvalidNamespace(String),

    #[error(transparent)]
    Query(#[from] ExecutorError),

    #[error("cannot encode {path}: {source}")]
    Encode { path: PathBuf, source: CodecError },

    #[error("cannot encode {path}: primary failed ({primary}), fallback failed ({fallback})")]
    EncodeFallback {
        path: PathBuf,
        primary: CodecError,
        fallback: CodecError,
    },

    #[error("corrupted cache entry {path}: {source}")]
    Corrupt { path: PathBuf, source: CodecError },

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory; entries live under `<root>/<analysis>/cache/`
    pub cache_root: PathBuf,
    /// Serialize misses per fingerprint when set
    pub lock_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("./data"),
            lock_timeout: None,
        }
    }
}

impl CacheConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// One cache lookup.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    /// Namespace under the cache root
    pub analysis: &'a str,
    pub sql_path: &'a Path,
    pub params: &'a Params,
    pub project: Option<&'a str>,
    pub location: Option<&'a str>,
    pub max_bytes_billed: Option<u64>,
    /// `None` means entries never go stale
    pub ttl_hours: Option<u64>,
    /// Skip the lookup and always query
    pub force_refresh: bool,
}

impl<'a> CacheRequest<'a> {
    pub fn new(analysis: &'a str, sql_path: &'a Path, params: &'a Params) -> Self {
        Self {
            analysis,
            sql_path,
            params,
            project: None,
            location: None,
            max_bytes_billed: None,
            ttl_hours: None,
            force_refresh: false,
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

    pub fn with_ttl_hours(mut self, ttl_hours: Option<u64>) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    fn context(&self) -> QueryContext<'a> {
        QueryContext {
            project: self.project,
            location: self.location,
            max_bytes_billed: self.max_bytes_billed,
        }
    }
}

/// Where a returned table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "format")]
pub enum FetchSource {
    /// Served from a fresh entry
    Cache(StorageFormat),
    /// Queried and stored
    Warehouse(StorageFormat),
}

/// A table together with how it was obtained.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub table: Table,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub source: FetchSource,
}

/// State of the entry a request maps to.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub analysis: String,
    pub fingerprint: Fingerprint,
    /// Canonical (primary format) path
    pub path: PathBuf,
    /// Path actually present on disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<StorageFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,
    /// Whether a lookup would be served from disk
    pub fresh: bool,
}

/// Result cache manager.
pub struct ResultCache<E> {
    config: CacheConfig,
    store: TableStore,
    executor: E,
    clock: fn() -> SystemTime,
}

impl<E: QueryExecutor> ResultCache<E> {
    pub fn new(config: CacheConfig, executor: E) -> Self {
        Self {
            config,
            store: TableStore::new(),
            executor,
            clock: SystemTime::now,
        }
    }

    /// Replace the table store (codec selection).
    pub fn with_store(mut self, store: TableStore) -> Self {
        self.store = store;
        self
    }

    /// Replace the clock used for freshness checks.
    pub fn with_clock(mut self, clock: fn() -> SystemTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// `<root>/<analysis>/cache`
    pub fn cache_dir(&self, analysis: &str) -> CacheResult<PathBuf> {
        validate_namespace(analysis)?;
        Ok(self.config.cache_root.join(analysis).join("cache"))
    }

    /// Fingerprint a request without touching the cache.
    pub fn fingerprint(&self, request: &CacheRequest<'_>) -> CacheResult<Fingerprint> {
        let sql = SqlSource::load(request.sql_path)?;
        Fingerprint::compute(&sql, request.params, &request.context())
    }

    /// Report the entry a request maps to, without querying.
    pub fn inspect(&self, request: &CacheRequest<'_>) -> CacheResult<EntryStatus> {
        let cache_dir = self.cache_dir(request.analysis)?;
        let fingerprint = self.fingerprint(request)?;
        let path = self.store.entry_path(&cache_dir, &fingerprint);

        let mut status = EntryStatus {
            analysis: request.analysis.to_string(),
            fingerprint,
            path,
            stored_path: None,
            format: None,
            modified: None,
            age_seconds: None,
            fresh: false,
        };

        if let Some(entry) = self.store.locate(&status.path) {
            let modified = entry.modified()?;
            let policy = FreshnessPolicy::from_ttl_hours(request.ttl_hours);
            let now = (self.clock)();

            status.fresh = !request.force_refresh && policy.is_fresh(modified, now);
            status.age_seconds = Some(freshness::age(modified, now).as_secs());
            status.modified = Some(DateTime::<Utc>::from(modified));
            status.format = Some(entry.format);
            status.stored_path = Some(entry.path);
        }

        Ok(status)
    }

    /// Return the cached table for a request, querying on a miss.
    pub fn get_or_fetch(&self, request: &CacheRequest<'_>) -> CacheResult<Table> {
        self.fetch(request).map(|outcome| outcome.table)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), reporting where the table
    /// came from.
    pub fn fetch(&self, request: &CacheRequest<'_>) -> CacheResult<FetchOutcome> {
        let cache_dir = self.cache_dir(request.analysis)?;
        let sql = SqlSource::load(request.sql_path)?;
        let fingerprint = Fingerprint::compute(&sql, request.params, &request.context())?;
        let path = self.store.entry_path(&cache_dir, &fingerprint);

        let span = tracing::debug_span!(
            "fetch",
            analysis = request.analysis,
            fingerprint = %fingerprint
        );
        let _enter = span.enter();

        let _lock = match self.config.lock_timeout {
            Some(timeout) => Some(EntryLock::acquire(&cache_dir, fingerprint.as_str(), timeout)?),
            None => None,
        };

        if request.force_refresh {
            tracing::debug!("force refresh, skipping lookup");
        } else if let Some(entry) = self.fresh_entry(&path, request.ttl_hours)? {
            let table = self.store.read(&entry.path)?;
            tracing::debug!(
                path = %entry.path.display(),
                format = %entry.format,
                rows = table.num_rows(),
                "cache hit"
            );
            return Ok(FetchOutcome {
                table,
                fingerprint,
                path: entry.path,
                source: FetchSource::Cache(entry.format),
            });
        }

        tracing::info!(sql = %sql.path().display(), "running query");
        let query = QueryRequest::new(sql.text(), request.params)
            .with_project(request.project)
            .with_location(request.location)
            .with_max_bytes_billed(request.max_bytes_billed);
        let table = self.executor.execute(&query)?;

        let entry = self.store.write(&path, &table)?;
        tracing::info!(
            path = %entry.path.display(),
            format = %entry.format,
            rows = table.num_rows(),
            "stored query result"
        );

        Ok(FetchOutcome {
            table,
            fingerprint,
            path: entry.path,
            source: FetchSource::Warehouse(entry.format),
        })
    }

    fn fresh_entry(&self, canonical: &Path, ttl_hours: Option<u64>) -> CacheResult<Option<StoredEntry>> {
        let Some(entry) = self.store.locate(canonical) else {
            tracing::debug!("cache miss");
            return Ok(None);
        };

        let modified = entry.modified()?;
        if FreshnessPolicy::from_ttl_hours(ttl_hours).is_fresh(modified, (self.clock)()) {
            Ok(Some(entry))
        } else {
            tracing::debug!(path = %entry.path.display(), ttl_hours, "entry is stale");
            Ok(None)
        }
    }
}

/// An analysis name must be exactly one normal path component.
fn validate_namespace(analysis: &str) -> CacheResult<()> {
    let mut components = Path::new(analysis).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );

    if single && !analysis.contains('/') && !analysis.contains('\\') {
        Ok(())
    } else {
        Err(CacheError::InvalidNamespace(analysis.to_string()))
    }
}
