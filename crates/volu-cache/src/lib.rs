//! Filesystem-backed query result cache
//!
//! Results are keyed by a fingerprint of the SQL file (path and content),
//! the bound parameters and the execution context, and stored under
//! `<root>/<analysis>/cache/<fingerprint>.parquet`. Tables that Parquet
//! cannot hold are stored as `<fingerprint>.csv` instead.
//!
//! ## Freshness
//!
//! Entries are judged at read time against an optional TTL in hours. Stale
//! entries are never deleted, only overwritten by the next fetch.
//!
//! ## Locking
//!
//! With `CacheConfig::lock_timeout` set, lookups on the same fingerprint
//! are serialized with an advisory file lock, so concurrent misses run the
//! query once.

pub mod codec;
pub mod fingerprint;
pub mod freshness;
mod lock;
mod result;
pub mod store;

pub use codec::{CodecError, CsvCodec, ParquetCodec, StorageFormat, TableCodec};
pub use fingerprint::{canonical_params, Fingerprint, FingerprintInputs, QueryContext, SqlSource};
pub use freshness::FreshnessPolicy;
pub use lock::{EntryLock, LockError, LockResult};
pub use result::{
    CacheConfig, CacheError, CacheRequest, CacheResult, EntryStatus, FetchOutcome, FetchSource,
    ResultCache,
};
pub use store::{StoredEntry, TableStore};
