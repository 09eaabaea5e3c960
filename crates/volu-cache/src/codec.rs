//! Table codecs for cache entries
//!
//! Two on-disk formats:
//! - `parquet`: columnar, typed (Boolean / Int64 / Float64 / Utf8). Primary.
//! - `csv`: header row plus one line per row. Fallback for tables the
//!   columnar format cannot represent, or when the primary codec is
//!   unavailable.
//!
//! Both go through an Arrow `RecordBatch`. Cache entries written as CSV
//! carry their column types in the header (`count:INT64`), with STRING
//! cells and mixed-type (`JSON`) cells stored as JSON literals, so every
//! value reads back exactly. An empty cell is null.
//!
//! Plain CSV (no type tags, e.g. `bq` output) is re-typed on read one
//! column at a time: all integers → Int, all numbers → Float, all
//! `true`/`false` → Bool, anything else → String.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use volu_query::{Table, Value};

/// Errors from encoding or decoding a table.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{format} codec unavailable: {reason}")]
    Unavailable {
        format: StorageFormat,
        reason: String,
    },

    #[error("column '{column}' mixes {first} and {second} values")]
    MixedColumn {
        column: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("column '{column}' has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("malformed table: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Serialization-class failure that another format may not hit.
    ///
    /// I/O errors are not format failures.
    pub fn is_format_failure(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

/// On-disk format of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Parquet,
    Csv,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Parquet => "parquet",
            StorageFormat::Csv => "csv",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "parquet" => Some(StorageFormat::Parquet),
            "csv" => Some(StorageFormat::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Serializes tables to bytes and reads them back from files.
pub trait TableCodec: Send + Sync {
    fn format(&self) -> StorageFormat;

    /// Encode the whole table in memory.
    fn encode(&self, table: &Table) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, file: File) -> Result<Table, CodecError>;
}

/// Columnar Parquet codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetCodec;

impl TableCodec for ParquetCodec {
    fn format(&self) -> StorageFormat {
        StorageFormat::Parquet
    }

    fn encode(&self, table: &Table) -> Result<Vec<u8>, CodecError> {
        if table.num_columns() == 0 {
            return Err(CodecError::Malformed("parquet needs at least one column".to_string()));
        }
        let batch = to_record_batch(table, ColumnTyping::Reject)?;

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(buffer)
    }

    fn decode(&self, file: File) -> Result<Table, CodecError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<Result<Vec<_>, ArrowError>>()?;

        table_from_batches(&schema, &batches)
    }
}

/// Row-oriented CSV codec with a header row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

impl TableCodec for CsvCodec {
    fn format(&self) -> StorageFormat {
        StorageFormat::Csv
    }

    /// Type-tagged CSV that decodes to an identical table.
    fn encode(&self, table: &Table) -> Result<Vec<u8>, CodecError> {
        if table.num_columns() == 0 {
            return Ok(Vec::new());
        }
        write_csv(&to_tagged_batch(table)?)
    }

    fn decode(&self, mut file: File) -> Result<Table, CodecError> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        self.decode_bytes(&bytes)
    }
}

impl CsvCodec {
    /// Plain CSV for people and other tools: bare column names, cells as
    /// text, mixed columns written as text.
    pub fn encode_plain(&self, table: &Table) -> Result<Vec<u8>, CodecError> {
        if table.num_columns() == 0 {
            return Ok(Vec::new());
        }
        write_csv(&to_record_batch(table, ColumnTyping::AsText)?)
    }

    /// Decode CSV text held in memory, such as captured command output.
    ///
    /// Empty input is a table with no columns.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Table, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Table::empty(Vec::new()));
        }
        self.decode_reader(Cursor::new(bytes))
    }

    fn decode_reader<R: Read + Seek>(&self, mut reader: R) -> Result<Table, CodecError> {
        let (header, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut reader, None)?;
        reader.seek(SeekFrom::Start(0))?;

        // Read every cell as text; typing happens per column afterwards.
        let fields: Vec<Field> = header
            .fields()
            .iter()
            .map(|f| Field::new(f.name().as_str(), DataType::Utf8, true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let header: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        let reader = ReaderBuilder::new(schema).with_header(true).build(reader)?;
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); header.len()];
        for batch in reader {
            let batch = batch?;
            for (index, array) in batch.columns().iter().enumerate() {
                let strings = downcast::<StringArray>(&header[index], array.as_ref())?;
                for i in 0..strings.len() {
                    let text = (!strings.is_null(i)).then(|| strings.value(i));
                    cells[index].push(text.filter(|t| !t.is_empty()).map(str::to_string));
                }
            }
        }

        let (columns, typed) = match tagged_header(&header) {
            Some(tagged) => {
                let mut columns = Vec::with_capacity(tagged.len());
                let mut typed = Vec::with_capacity(tagged.len());
                for ((name, kind), column) in tagged.into_iter().zip(cells) {
                    typed.push(parse_tagged_column(&name, kind, column)?);
                    columns.push(name);
                }
                (columns, typed)
            }
            None => (header, cells.into_iter().map(infer_text_column).collect()),
        };

        let num_rows = typed.first().map_or(0, Vec::len);
        let mut rows = vec![Vec::with_capacity(columns.len()); num_rows];
        for column in typed {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }

        Table::new(columns, rows).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

fn write_csv(batch: &RecordBatch) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(batch)?;
    }
    Ok(buffer)
}

/// How to type a column whose cells differ in kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnTyping {
    /// Int and Float widen to Float; anything else is an error.
    Reject,
    /// Int and Float widen to Float; anything else becomes text.
    AsText,
    /// No widening; differing kinds become a JSON column.
    Tagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Json,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Int(_) => ColumnKind::Int,
            Value::Float(_) => ColumnKind::Float,
            Value::String(_) => ColumnKind::Text,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ColumnKind::Null => "null",
            ColumnKind::Bool => "boolean",
            ColumnKind::Int => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Text => "string",
            ColumnKind::Json => "mixed",
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnKind::Bool => DataType::Boolean,
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Null | ColumnKind::Text | ColumnKind::Json => DataType::Utf8,
        }
    }

    /// Header tag in type-tagged CSV.
    fn tag(&self) -> &'static str {
        match self {
            ColumnKind::Bool => "BOOL",
            ColumnKind::Int => "INT64",
            ColumnKind::Float => "FLOAT64",
            ColumnKind::Null | ColumnKind::Text => "STRING",
            ColumnKind::Json => "JSON",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BOOL" => Some(ColumnKind::Bool),
            "INT64" => Some(ColumnKind::Int),
            "FLOAT64" => Some(ColumnKind::Float),
            "STRING" => Some(ColumnKind::Text),
            "JSON" => Some(ColumnKind::Json),
            _ => None,
        }
    }

    /// Narrowest kind covering both, or `None` if they conflict.
    fn unify(self, other: Self, typing: ColumnTyping) -> Option<Self> {
        match (self, other) {
            (a, ColumnKind::Null) => Some(a),
            (ColumnKind::Null, b) => Some(b),
            (a, b) if a == b => Some(a),
            (ColumnKind::Int, ColumnKind::Float) | (ColumnKind::Float, ColumnKind::Int)
                if typing != ColumnTyping::Tagged =>
            {
                Some(ColumnKind::Float)
            }
            _ => None,
        }
    }
}

/// Kind of each column under `typing`.
fn column_kinds(table: &Table, typing: ColumnTyping) -> Result<Vec<ColumnKind>, CodecError> {
    let rows = table.rows();
    let mut kinds = Vec::with_capacity(table.num_columns());

    for (index, name) in table.columns().iter().enumerate() {
        let mut kind = ColumnKind::Null;
        for row in rows {
            let cell = ColumnKind::of(&row[index]);
            match (kind.unify(cell, typing), typing) {
                (Some(unified), _) => kind = unified,
                (None, ColumnTyping::AsText) => {
                    kind = ColumnKind::Text;
                    break;
                }
                (None, ColumnTyping::Tagged) => {
                    kind = ColumnKind::Json;
                    break;
                }
                (None, ColumnTyping::Reject) => {
                    return Err(CodecError::MixedColumn {
                        column: name.clone(),
                        first: kind.name(),
                        second: cell.name(),
                    })
                }
            }
        }
        kinds.push(kind);
    }
    Ok(kinds)
}

fn to_record_batch(table: &Table, typing: ColumnTyping) -> Result<RecordBatch, CodecError> {
    let kinds = column_kinds(table, typing)?;
    let mut fields = Vec::with_capacity(kinds.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(kinds.len());

    for (index, (name, kind)) in table.columns().iter().zip(kinds).enumerate() {
        fields.push(Field::new(name.as_str(), kind.data_type(), true));
        arrays.push(build_array(kind, table.rows(), index));
    }

    batch_of(fields, arrays, table.num_rows())
}

/// Every column as text under a `name:TAG` header.
fn to_tagged_batch(table: &Table) -> Result<RecordBatch, CodecError> {
    let kinds = column_kinds(table, ColumnTyping::Tagged)?;
    let mut fields = Vec::with_capacity(kinds.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(kinds.len());

    for (index, (name, kind)) in table.columns().iter().zip(kinds).enumerate() {
        let cells = table
            .rows()
            .iter()
            .map(|row| tagged_cell(name, kind, &row[index]))
            .collect::<Result<Vec<_>, _>>()?;
        fields.push(Field::new(format!("{}:{}", name, kind.tag()), DataType::Utf8, true));
        arrays.push(Arc::new(StringArray::from(cells)));
    }

    batch_of(fields, arrays, table.num_rows())
}

fn batch_of(
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
    num_rows: usize,
) -> Result<RecordBatch, CodecError> {
    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
}

fn tagged_cell(column: &str, kind: ColumnKind, value: &Value) -> Result<Option<String>, CodecError> {
    let text = match (kind, value) {
        (_, Value::Null) => return Ok(None),
        (ColumnKind::Text, Value::String(s)) => serde_json::Value::from(s.as_str()).to_string(),
        (ColumnKind::Json, value) => json_cell(column, value)?.to_string(),
        (_, value) => value.to_string(),
    };
    Ok(Some(text))
}

fn json_cell(column: &str, value: &Value) -> Result<serde_json::Value, CodecError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                CodecError::Malformed(format!("column '{}' has non-finite value {}", column, f))
            })?,
        Value::String(s) => serde_json::Value::from(s.as_str()),
    })
}

/// `(name, kind)` per column when every header cell carries a known tag.
fn tagged_header(header: &[String]) -> Option<Vec<(String, ColumnKind)>> {
    if header.is_empty() {
        return None;
    }
    header
        .iter()
        .map(|cell| {
            let (name, tag) = cell.rsplit_once(':')?;
            Some((name.to_string(), ColumnKind::from_tag(tag)?))
        })
        .collect()
}

fn parse_tagged_column(
    column: &str,
    kind: ColumnKind,
    cells: Vec<Option<String>>,
) -> Result<Vec<Value>, CodecError> {
    let malformed = |text: &str| {
        CodecError::Malformed(format!(
            "column '{}' has invalid {} cell {:?}",
            column,
            kind.tag(),
            text
        ))
    };

    cells
        .into_iter()
        .map(|cell| {
            let Some(text) = cell else {
                return Ok(Value::Null);
            };
            match kind {
                ColumnKind::Bool => match text.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(malformed(&text)),
                },
                ColumnKind::Int => text.parse().map(Value::Int).map_err(|_| malformed(&text)),
                ColumnKind::Float => text.parse().map(Value::Float).map_err(|_| malformed(&text)),
                ColumnKind::Null | ColumnKind::Text => serde_json::from_str::<String>(&text)
                    .map(Value::String)
                    .map_err(|_| malformed(&text)),
                ColumnKind::Json => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(serde_json::Value::Null) => Ok(Value::Null),
                    Ok(serde_json::Value::Bool(b)) => Ok(Value::Bool(b)),
                    Ok(serde_json::Value::Number(n)) => match n.as_i64() {
                        Some(i) => Ok(Value::Int(i)),
                        None => n.as_f64().map(Value::Float).ok_or_else(|| malformed(&text)),
                    },
                    Ok(serde_json::Value::String(s)) => Ok(Value::String(s)),
                    _ => Err(malformed(&text)),
                },
            }
        })
        .collect()
}

fn build_array(kind: ColumnKind, rows: &[Vec<Value>], index: usize) -> ArrayRef {
    match kind {
        ColumnKind::Bool => Arc::new(
            rows.iter()
                .map(|row| row[index].as_bool())
                .collect::<BooleanArray>(),
        ),
        ColumnKind::Int => Arc::new(
            rows.iter()
                .map(|row| row[index].as_i64())
                .collect::<Int64Array>(),
        ),
        ColumnKind::Float => Arc::new(
            rows.iter()
                .map(|row| row[index].as_f64())
                .collect::<Float64Array>(),
        ),
        ColumnKind::Null | ColumnKind::Text | ColumnKind::Json => Arc::new(
            rows.iter()
                .map(|row| match &row[index] {
                    Value::Null => None,
                    value => Some(value.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

fn table_from_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Table, CodecError> {
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let mut rows = Vec::new();

    for batch in batches {
        let mut batch_rows = vec![Vec::with_capacity(columns.len()); batch.num_rows()];
        for (index, array) in batch.columns().iter().enumerate() {
            append_column(&columns[index], array.as_ref(), &mut batch_rows)?;
        }
        rows.extend(batch_rows);
    }

    Table::new(columns, rows).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn append_column(name: &str, array: &dyn Array, rows: &mut [Vec<Value>]) -> Result<(), CodecError> {
    match array.data_type() {
        DataType::Boolean => {
            let values = downcast::<BooleanArray>(name, array)?;
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(if values.is_null(i) {
                    Value::Null
                } else {
                    Value::Bool(values.value(i))
                });
            }
        }
        DataType::Int64 => {
            let values = downcast::<Int64Array>(name, array)?;
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(if values.is_null(i) {
                    Value::Null
                } else {
                    Value::Int(values.value(i))
                });
            }
        }
        DataType::Float64 => {
            let values = downcast::<Float64Array>(name, array)?;
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(if values.is_null(i) {
                    Value::Null
                } else {
                    Value::Float(values.value(i))
                });
            }
        }
        DataType::Utf8 => {
            let values = downcast::<StringArray>(name, array)?;
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(if values.is_null(i) {
                    Value::Null
                } else {
                    Value::String(values.value(i).to_string())
                });
            }
        }
        DataType::Null => {
            for row in rows.iter_mut() {
                row.push(Value::Null);
            }
        }
        other => {
            return Err(CodecError::UnsupportedType {
                column: name.to_string(),
                data_type: other.to_string(),
            })
        }
    }
    Ok(())
}

fn downcast<'a, T: 'static>(name: &str, array: &'a dyn Array) -> Result<&'a T, CodecError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CodecError::UnsupportedType {
            column: name.to_string(),
            data_type: array.data_type().to_string(),
        })
}

fn infer_text_column(cells: Vec<Option<String>>) -> Vec<Value> {
    let kind = text_column_kind(&cells);
    cells
        .into_iter()
        .map(|cell| match cell {
            None => Value::Null,
            Some(text) => match kind {
                ColumnKind::Int => text.parse().map(Value::Int).unwrap_or(Value::Null),
                ColumnKind::Float => text.parse().map(Value::Float).unwrap_or(Value::Null),
                ColumnKind::Bool => Value::Bool(text == "true"),
                _ => Value::String(text),
            },
        })
        .collect()
}

fn text_column_kind(cells: &[Option<String>]) -> ColumnKind {
    let present = || cells.iter().flatten();

    if present().all(|s| s.parse::<i64>().is_ok()) {
        ColumnKind::Int
    } else if present().all(|s| s.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if present().all(|s| s == "true" || s == "false") {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}
