//! Table store for cache entries.
//!
//! An entry lives at `<cache dir>/<fingerprint>.<ext>` where `<ext>` is the
//! primary codec's extension, or the fallback codec's extension when the
//! primary could not encode the table. At most one format exists per
//! fingerprint: writing one removes the other.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so readers see either the old entry or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use volu_query::Table;

use crate::codec::{CsvCodec, ParquetCodec, StorageFormat, TableCodec};
use crate::fingerprint::Fingerprint;
use crate::result::{CacheError, CacheResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A cache entry present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub path: PathBuf,
    pub format: StorageFormat,
}

impl StoredEntry {
    /// Last modification time of the entry file.
    pub fn modified(&self) -> io::Result<SystemTime> {
        fs::metadata(&self.path)?.modified()
    }
}

/// Reads and writes tables with a primary and a fallback codec.
pub struct TableStore {
    primary: Box<dyn TableCodec>,
    fallback: Box<dyn TableCodec>,
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("primary", &self.primary.format())
            .field("fallback", &self.fallback.format())
            .finish()
    }
}

impl TableStore {
    /// Parquet first, CSV on fallback.
    pub fn new() -> Self {
        Self::with_codecs(Box::new(ParquetCodec), Box::new(CsvCodec))
    }

    pub fn with_codecs(primary: Box<dyn TableCodec>, fallback: Box<dyn TableCodec>) -> Self {
        Self { primary, fallback }
    }

    pub fn primary_format(&self) -> StorageFormat {
        self.primary.format()
    }

    pub fn fallback_format(&self) -> StorageFormat {
        self.fallback.format()
    }

    /// Canonical entry path: `<cache_dir>/<fingerprint>.<primary ext>`.
    pub fn entry_path(&self, cache_dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
        cache_dir.join(format!("{}.{}", fingerprint, self.primary.format().extension()))
    }

    /// Find the entry for a canonical path in whichever format exists.
    pub fn locate(&self, canonical: &Path) -> Option<StoredEntry> {
        [self.primary.format(), self.fallback.format()]
            .into_iter()
            .map(|format| StoredEntry {
                path: canonical.with_extension(format.extension()),
                format,
            })
            .find(|entry| entry.path.is_file())
    }

    /// Read a stored table.
    ///
    /// The codec is chosen by extension; unknown extensions are read as
    /// the fallback (text) format. A missing primary-format path whose
    /// fallback sibling exists reads the sibling.
    pub fn read(&self, path: &Path) -> CacheResult<Table> {
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(StorageFormat::from_extension);

        let (path, format) = match format {
            Some(format) if format == self.primary.format() && !path.exists() => {
                let sibling = path.with_extension(self.fallback.format().extension());
                if sibling.exists() {
                    (sibling, self.fallback.format())
                } else {
                    (path.to_path_buf(), format)
                }
            }
            Some(format) => (path.to_path_buf(), format),
            None => (path.to_path_buf(), self.fallback.format()),
        };

        let file = File::open(&path)?;
        self.codec_for(format)
            .decode(file)
            .map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Write a table for the given canonical path.
    ///
    /// Encodes with the primary codec; on a format-class failure encodes
    /// with the fallback codec instead. Parent directories are created.
    pub fn write(&self, canonical: &Path, table: &Table) -> CacheResult<StoredEntry> {
        let (format, bytes) = match self.primary.encode(table) {
            Ok(bytes) => (self.primary.format(), bytes),
            Err(primary) if primary.is_format_failure() => {
                tracing::warn!(
                    path = %canonical.display(),
                    error = %primary,
                    fallback = %self.fallback.format(),
                    "primary encoding failed, writing fallback format"
                );
                match self.fallback.encode(table) {
                    Ok(bytes) => (self.fallback.format(), bytes),
                    Err(fallback) => {
                        return Err(CacheError::EncodeFallback {
                            path: canonical.to_path_buf(),
                            primary,
                            fallback,
                        })
                    }
                }
            }
            Err(source) => {
                return Err(CacheError::Encode {
                    path: canonical.to_path_buf(),
                    source,
                })
            }
        };

        if let Some(parent) = canonical.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry = StoredEntry {
            path: canonical.with_extension(format.extension()),
            format,
        };
        write_atomic(&entry.path, &bytes)?;

        // The new entry is in place; a stale sibling only costs disk.
        for other in [self.primary.format(), self.fallback.format()] {
            if other == format {
                continue;
            }
            let stale = canonical.with_extension(other.extension());
            if let Err(e) = remove_if_exists(&stale) {
                tracing::warn!(
                    path = %stale.display(),
                    error = %e,
                    "cannot remove stale entry in other format"
                );
            }
        }

        Ok(entry)
    }

    fn codec_for(&self, format: StorageFormat) -> &dyn TableCodec {
        if format == self.primary.format() {
            self.primary.as_ref()
        } else {
            self.fallback.as_ref()
        }
    }
}

/// Write bytes to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = dir.join(format!(
        ".tmp.{}.{}.{}.{}",
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        file_name
    ));

    let result = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&temp_path, path));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use tempfile::TempDir;
    use volu_query::Value;

    /// Primary codec that is never available.
    struct UnavailableCodec;

    impl TableCodec for UnavailableCodec {
        fn format(&self) -> StorageFormat {
            StorageFormat::Parquet
        }

        fn encode(&self, _table: &Table) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Unavailable {
                format: StorageFormat::Parquet,
                reason: "no parquet support".to_string(),
            })
        }

        fn decode(&self, _file: File) -> Result<Table, CodecError> {
            Err(CodecError::Unavailable {
                format: StorageFormat::Parquet,
                reason: "no parquet support".to_string(),
            })
        }
    }

    fn brands() -> Table {
        Table::new(
            vec!["brand_name".to_string(), "count".to_string()],
            vec![
                vec![Value::from("Acme"), Value::Int(12)],
                vec![Value::from("Globex"), Value::Int(7)],
            ],
        )
        .unwrap()
    }

    fn mixed() -> Table {
        Table::new(
            vec!["x".to_string()],
            vec![vec![Value::Int(1)], vec![Value::from("one")]],
        )
        .unwrap()
    }

    #[test]
    fn test_write_primary_creates_directories() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("Demo/cache/abc.parquet");
        let store = TableStore::new();

        let entry = store.write(&canonical, &brands()).unwrap();

        assert_eq!(entry.format, StorageFormat::Parquet);
        assert_eq!(entry.path, canonical);
        assert_eq!(store.read(&canonical).unwrap(), brands());
    }

    #[test]
    fn test_fallback_round_trip_when_primary_unavailable() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        let store = TableStore::with_codecs(Box::new(UnavailableCodec), Box::new(CsvCodec));

        let entry = store.write(&canonical, &brands()).unwrap();

        assert_eq!(entry.format, StorageFormat::Csv);
        assert_eq!(entry.path, temp.path().join("abc.csv"));
        assert!(!canonical.exists());

        // Reading the canonical path finds the CSV sibling.
        let table = store.read(&canonical).unwrap();
        assert_eq!(table.columns(), brands().columns());
        assert_eq!(table, brands());
    }

    #[test]
    fn test_fallback_keeps_strings_that_look_typed() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        let store = TableStore::with_codecs(Box::new(UnavailableCodec), Box::new(CsvCodec));
        let table = Table::new(
            vec![
                "zip".to_string(),
                "score".to_string(),
                "note".to_string(),
                "flag".to_string(),
                "day".to_string(),
            ],
            vec![
                vec![
                    Value::from("007"),
                    Value::Float(12.0),
                    Value::from(""),
                    Value::from("true"),
                    Value::from("2024-01-01"),
                ],
                vec![
                    Value::from("1.5"),
                    Value::Null,
                    Value::Null,
                    Value::from("NULL"),
                    Value::from("say \"hi\", then\nleave"),
                ],
            ],
        )
        .unwrap();

        store.write(&canonical, &table).unwrap();

        assert_eq!(store.read(&canonical).unwrap(), table);
    }

    #[test]
    fn test_mixed_column_falls_back_to_csv() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        let store = TableStore::new();

        let entry = store.write(&canonical, &mixed()).unwrap();
        assert_eq!(entry.format, StorageFormat::Csv);

        let located = store.locate(&canonical).unwrap();
        assert_eq!(located, entry);
        assert_eq!(store.read(&canonical).unwrap(), mixed());
    }

    #[test]
    fn test_write_removes_other_format() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        let store = TableStore::new();

        store.write(&canonical, &mixed()).unwrap();
        assert!(temp.path().join("abc.csv").exists());

        store.write(&canonical, &brands()).unwrap();
        assert!(canonical.exists());
        assert!(!temp.path().join("abc.csv").exists());
        assert_eq!(store.locate(&canonical).unwrap().format, StorageFormat::Parquet);

        store.write(&canonical, &mixed()).unwrap();
        assert!(!canonical.exists());
        assert_eq!(store.locate(&canonical).unwrap().format, StorageFormat::Csv);
    }

    #[test]
    fn test_stale_sibling_that_cannot_be_removed() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        let stale = temp.path().join("abc.csv");
        fs::create_dir_all(stale.join("blocker")).unwrap();

        let entry = TableStore::new().write(&canonical, &brands()).unwrap();

        assert_eq!(entry.format, StorageFormat::Parquet);
        assert!(stale.is_dir());
        assert_eq!(TableStore::new().read(&canonical).unwrap(), brands());
    }

    #[test]
    fn test_locate_missing() {
        let temp = TempDir::new().unwrap();
        assert!(TableStore::new()
            .locate(&temp.path().join("abc.parquet"))
            .is_none());
    }

    #[test]
    fn test_read_corrupt_entry() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        fs::write(&canonical, b"garbage").unwrap();

        let err = TableStore::new().read(&canonical).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[test]
    fn test_read_unknown_extension_as_text() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("export.txt");
        fs::write(&path, "brand_name,count\nAcme,12\nGlobex,7\n").unwrap();

        assert_eq!(TableStore::new().read(&path).unwrap(), brands());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let canonical = temp.path().join("abc.parquet");
        TableStore::new().write(&canonical, &brands()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
