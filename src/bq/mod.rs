//! BigQuery executor backed by the `bq` command-line tool.
//!
//! Runs `bq query` in standard SQL mode with CSV output and parses stdout
//! into a [`Table`]. Authentication, retries and job polling are left to
//! `bq` itself.
//!
//! CSV output carries no schema, so column types are inferred from the
//! cells: a column of integers is INT64 even when the warehouse column is
//! a STRING of digits, and DATE/TIMESTAMP columns arrive as strings. Once
//! read, the types are fixed: cache entries store them explicitly.

use std::process::{Command, Output};

use thiserror::Error;
use volu_cache::CsvCodec;
use volu_query::{ExecutorError, ParamValue, QueryExecutor, QueryRequest, Table};

/// Rows requested from `bq`; its own default is 100.
pub const DEFAULT_MAX_ROWS: u64 = 10_000_000;

/// Errors building a `bq` invocation.
#[derive(Debug, Error)]
pub enum BqError {
    #[error("invalid parameter name '{0}': use letters, digits and underscores")]
    InvalidParameterName(String),
}

impl From<BqError> for ExecutorError {
    fn from(e: BqError) -> Self {
        ExecutorError::Failed(e.to_string())
    }
}

/// [`QueryExecutor`] that shells out to `bq`.
#[derive(Debug, Clone)]
pub struct BqCliExecutor {
    binary: String,
    max_rows: u64,
}

impl Default for BqCliExecutor {
    fn default() -> Self {
        Self::new("bq")
    }
}

impl BqCliExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments for one query, SQL text last.
    pub fn command_args(&self, request: &QueryRequest<'_>) -> Result<Vec<String>, BqError> {
        let mut args = Vec::new();

        // Global flags precede the command.
        if let Some(project) = request.project.filter(|p| !p.is_empty()) {
            args.push(format!("--project_id={}", project));
        }
        if let Some(location) = request.location.filter(|l| !l.is_empty()) {
            args.push(format!("--location={}", location));
        }

        args.push("query".to_string());
        args.push("--use_legacy_sql=false".to_string());
        args.push("--format=csv".to_string());
        args.push("--quiet".to_string());
        args.push(format!("--max_rows={}", self.max_rows));
        if let Some(cap) = request.max_bytes_billed {
            args.push(format!("--maximum_bytes_billed={}", cap));
        }

        for (name, value) in request.params {
            args.push(format!("--parameter={}", parameter_arg(name, value)?));
        }

        args.push(request.sql.to_string());
        Ok(args)
    }

    fn run(&self, args: &[String]) -> Result<Output, ExecutorError> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|source| ExecutorError::Launch {
                program: self.binary.clone(),
                source,
            })
    }
}

impl QueryExecutor for BqCliExecutor {
    fn execute(&self, request: &QueryRequest<'_>) -> Result<Table, ExecutorError> {
        let args = self.command_args(request)?;
        tracing::debug!(
            binary = %self.binary,
            params = request.params.len(),
            project = request.project.unwrap_or_default(),
            location = request.location.unwrap_or_default(),
            "invoking bq"
        );

        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(classify_failure(&output, request.max_bytes_billed));
        }

        CsvCodec
            .decode_bytes(&output.stdout)
            .map_err(|e| ExecutorError::Output(e.to_string()))
    }
}

/// `name:TYPE:value`; nulls have an empty value.
fn parameter_arg(name: &str, value: &ParamValue) -> Result<String, BqError> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(BqError::InvalidParameterName(name.to_string()));
    }

    Ok(format!(
        "{}:{}:{}",
        name,
        value.param_type().wire_name(),
        value.wire_value().unwrap_or_default()
    ))
}

/// `bq` reports errors on stderr, and sometimes on stdout.
fn classify_failure(output: &Output, limit: Option<u64>) -> ExecutorError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let message = if message.is_empty() {
        format!("bq exited with {}", output.status)
    } else {
        message
    };

    if message.to_lowercase().contains("bytes billed") {
        ExecutorError::BytesBilledExceeded { limit, message }
    } else {
        ExecutorError::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use volu_query::{ParamType, Params};

    fn demo_params() -> Params {
        let mut params = Params::new();
        params.insert(
            "start_date".to_string(),
            ParamValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        );
        params.insert("brand".to_string(), ParamValue::from("Acme"));
        params.insert("end_date".to_string(), ParamValue::Null(ParamType::Date));
        params
    }

    #[test]
    fn test_command_args_full_request() {
        let params = demo_params();
        let request = QueryRequest::new("SELECT @brand", &params)
            .with_project(Some("p1"))
            .with_location(Some("EU"))
            .with_max_bytes_billed(Some(1_000_000));

        let args = BqCliExecutor::new("bq").command_args(&request).unwrap();

        assert_eq!(
            args,
            vec![
                "--project_id=p1",
                "--location=EU",
                "query",
                "--use_legacy_sql=false",
                "--format=csv",
                "--quiet",
                "--max_rows=10000000",
                "--maximum_bytes_billed=1000000",
                "--parameter=brand:STRING:Acme",
                "--parameter=end_date:DATE:",
                "--parameter=start_date:DATE:2024-01-01",
                "SELECT @brand",
            ]
        );
    }

    #[test]
    fn test_command_args_minimal_request() {
        let params = Params::new();
        let request = QueryRequest::new("SELECT 1", &params).with_project(Some(""));

        let args = BqCliExecutor::default()
            .with_max_rows(5)
            .command_args(&request)
            .unwrap();

        assert_eq!(args[0], "query");
        assert!(args.contains(&"--max_rows=5".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--maximum_bytes_billed")));
        assert_eq!(args.last().map(String::as_str), Some("SELECT 1"));
    }

    #[test]
    fn test_parameter_values_keep_colons() {
        let arg = parameter_arg("label", &ParamValue::from("a:b")).unwrap();
        assert_eq!(arg, "label:STRING:a:b");

        let arg = parameter_arg("ratio", &ParamValue::Float(0.5)).unwrap();
        assert_eq!(arg, "ratio:FLOAT64:0.5");

        let arg = parameter_arg("flag", &ParamValue::Bool(true)).unwrap();
        assert_eq!(arg, "flag:BOOL:true");
    }

    #[test]
    fn test_invalid_parameter_names() {
        for name in ["", "1st", "a:b", "has space", "dash-ed"] {
            assert!(parameter_arg(name, &ParamValue::Int(1)).is_err(), "{:?}", name);
        }
        assert!(parameter_arg("_private", &ParamValue::Int(1)).is_ok());
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let params = Params::new();
        let request = QueryRequest::new("SELECT 1", &params);
        let executor = BqCliExecutor::new("/nonexistent/volu-bq-test/bq");

        let err = executor.execute(&request).unwrap_err();
        assert!(matches!(err, ExecutorError::Launch { .. }));
    }

    #[cfg(unix)]
    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_classify_bytes_billed() {
        let out = output(
            1,
            "",
            "Error in query string: Query exceeded limit for bytes billed: 1000. 10485760 or higher required.",
        );
        match classify_failure(&out, Some(1000)) {
            ExecutorError::BytesBilledExceeded { limit, message } => {
                assert_eq!(limit, Some(1000));
                assert!(message.contains("1000"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_classify_other_failures() {
        let out = output(2, "Syntax error: Unexpected identifier", "");
        assert!(matches!(
            classify_failure(&out, None),
            ExecutorError::Failed(m) if m.contains("Syntax error")
        ));

        let silent = output(1, "", "");
        assert!(matches!(
            classify_failure(&silent, None),
            ExecutorError::Failed(m) if m.starts_with("bq exited with")
        ));
    }
}
