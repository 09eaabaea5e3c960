//! Cache fingerprint derivation
//!
//! A fingerprint identifies one cacheable query: the SQL source (path and
//! content digest), the bound parameters and the execution context. It is
//! the SHA-256 hex digest of the RFC 8785 (JCS) canonical JSON of
//! [`FingerprintInputs`], so it is stable across processes and independent
//! of parameter insertion order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use volu_query::{ParamValue, Params};

use crate::result::{CacheError, CacheResult};

/// A SQL source read once from disk.
///
/// The text that is digested is the text that gets executed.
#[derive(Debug, Clone)]
pub struct SqlSource {
    path: PathBuf,
    text: String,
    sha256: String,
}

impl SqlSource {
    /// Read and digest a SQL file.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let bytes = fs::read(path).map_err(|source| CacheError::SqlSource {
            path: path.to_path_buf(),
            source,
        })?;
        let sha256 = sha256_hex(&bytes);
        let text =
            String::from_utf8(bytes).map_err(|_| CacheError::SqlEncoding(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            text,
            sha256,
        })
    }

    /// Build a source from text already in memory.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        let sha256 = sha256_hex(text.as_bytes());
        Self {
            path: path.into(),
            text,
            sha256,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// SHA-256 hex digest of the SQL bytes.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// Execution context that participates in the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryContext<'a> {
    pub project: Option<&'a str>,
    pub location: Option<&'a str>,
    pub max_bytes_billed: Option<u64>,
}

/// The canonical record hashed into a fingerprint.
///
/// Absent optional fields are the empty string, so "unset" and "empty"
/// produce the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintInputs {
    /// Logical path of the SQL source, as given by the caller
    pub sql_path: String,
    /// SHA-256 of the SQL source bytes
    pub sql_sha256: String,
    /// Canonical JSON of the bound parameters
    pub params: String,
    pub project: String,
    pub location: String,
    /// Decimal billing cap
    pub max_bytes: String,
}

impl FingerprintInputs {
    pub fn new(sql: &SqlSource, params: &Params, context: &QueryContext<'_>) -> CacheResult<Self> {
        Ok(Self {
            sql_path: sql.path().to_string_lossy().to_string(),
            sql_sha256: sql.sha256().to_string(),
            params: canonical_params(params)?,
            project: context.project.unwrap_or_default().to_string(),
            location: context.location.unwrap_or_default().to_string(),
            max_bytes: context
                .max_bytes_billed
                .map(|b| b.to_string())
                .unwrap_or_default(),
        })
    }

    /// Compute the fingerprint: SHA-256 hex digest of JCS(inputs).
    pub fn fingerprint(&self) -> CacheResult<Fingerprint> {
        let jcs_bytes = serde_json_canonicalizer::to_vec(self)
            .map_err(|e| CacheError::Canonicalize(e.to_string()))?;
        Ok(Fingerprint(sha256_hex(&jcs_bytes)))
    }
}

/// Canonical JSON of a parameter set: keys sorted, each value tagged with
/// its warehouse type.
pub fn canonical_params(params: &Params) -> CacheResult<String> {
    for (name, value) in params {
        if let ParamValue::Float(f) = value {
            if !f.is_finite() {
                return Err(CacheError::Canonicalize(format!(
                    "parameter '{}' is not a finite number",
                    name
                )));
            }
        }
    }

    let bytes = serde_json_canonicalizer::to_vec(params)
        .map_err(|e| CacheError::Canonicalize(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CacheError::Canonicalize(e.to_string()))
}

/// Hex-encoded SHA-256 identifying a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a SQL source, parameters and context.
    pub fn compute(sql: &SqlSource, params: &Params, context: &QueryContext<'_>) -> CacheResult<Self> {
        FingerprintInputs::new(sql, params, context)?.fingerprint()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
