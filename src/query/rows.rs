//! In-memory row sets and the loaders that fill them from CSV or JSON files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::query::catalog::{DataType, SchemaCatalog, TableDescriptor};
use crate::query::model::QueryModel;
use crate::query::value::{parse_date, Value};

/// One input row: field name to value. Absent fields read as null.
pub type Record = BTreeMap<String, Value>;

/// Rows keyed by table id, as loaded from disk before aliases are known.
pub type TableRows = BTreeMap<String, Vec<Record>>;

/// Row sets keyed by table alias.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSets {
    by_alias: BTreeMap<String, Vec<Record>>,
}

impl RowSets {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rows for an alias, replacing any previous rows.
    pub fn with(mut self, alias: impl Into<String>, rows: Vec<Record>) -> Self {
        self.insert(alias, rows);
        self
    }

    /// Stores rows for an alias, replacing any previous rows.
    pub fn insert(&mut self, alias: impl Into<String>, rows: Vec<Record>) {
        self.by_alias.insert(alias.into(), rows);
    }

    /// Rows of an alias.
    pub fn get(&self, alias: &str) -> Option<&[Record]> {
        self.by_alias.get(alias).map(Vec::as_slice)
    }

    /// Fans each table's rows out to every alias selecting that table.
    /// Aliases whose table has no rows are left absent.
    pub fn for_model(model: &QueryModel, by_table: &TableRows) -> Self {
        let mut sets = RowSets::new();
        for table in &model.tables {
            if let Some(rows) = by_table.get(&table.table_id) {
                sets.insert(table.alias.clone(), rows.clone());
            }
        }
        sets
    }
}

/// Builds a [`Record`] from `(field, value)` pairs.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Error type for row loading.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Filesystem failure.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Malformed CSV.
    #[error("invalid CSV in {path}: {source}")]
    Csv {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },
    /// Malformed JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A JSON document that is not an array of objects.
    #[error("{path} must contain an array of objects")]
    JsonShape {
        /// File being read.
        path: PathBuf,
    },
    /// A cell that cannot be converted to the column's catalog type.
    #[error("row {row} of '{table}': cannot read '{raw}' as {expected} for field '{field}'")]
    InvalidCell {
        /// Table id.
        table: String,
        /// Field name.
        field: String,
        /// 1-based data row number.
        row: usize,
        /// Raw cell text.
        raw: String,
        /// Catalog type.
        expected: DataType,
    },
    /// Neither `<table>.csv` nor `<table>.json` exists.
    #[error("no data file for table '{table}' in {dir}")]
    MissingTable {
        /// Table id.
        table: String,
        /// Directory searched.
        dir: PathBuf,
    },
    /// Table id absent from the catalog.
    #[error("unknown table '{table}'")]
    UnknownTable {
        /// Table id.
        table: String,
    },
}

impl LoadError {
    /// Machine-readable code, in the same style as query error codes.
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "LoadIo",
            LoadError::Csv { .. } => "LoadCsv",
            LoadError::Json { .. } => "LoadJson",
            LoadError::JsonShape { .. } => "LoadJsonShape",
            LoadError::InvalidCell { .. } => "InvalidCell",
            LoadError::MissingTable { .. } => "MissingTable",
            LoadError::UnknownTable { .. } => "UnknownTable",
        }
    }
}

/// Reads CSV rows for `table` from any reader. The first line holds headers;
/// columns unknown to the catalog are skipped.
pub fn read_csv<R: Read>(reader: R, table: &TableDescriptor, path: &Path) -> Result<Vec<Record>, LoadError> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let headers: StringRecord = reader.headers().map_err(csv_err)?.clone();
    let columns: Vec<Option<DataType>> = headers
        .iter()
        .map(|name| {
            let field = table.field(name.trim()).map(|f| f.data_type);
            if field.is_none() {
                trace!(table = %table.id, column = name, "rows.skip_unknown_column");
            }
            field
        })
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(csv_err)?;
        let mut row = Record::new();
        for ((name, data_type), raw) in headers.iter().zip(&columns).zip(record.iter()) {
            let Some(data_type) = data_type else {
                continue;
            };
            let name = name.trim();
            let value = convert_cell(raw, *data_type).ok_or_else(|| LoadError::InvalidCell {
                table: table.id.clone(),
                field: name.to_owned(),
                row: idx + 1,
                raw: raw.to_owned(),
                expected: *data_type,
            })?;
            row.insert(name.to_owned(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Reads a JSON array of flat objects for `table`. Strings are converted by
/// the catalog type so dates and numbers may be quoted.
pub fn read_json(text: &str, table: &TableDescriptor, path: &Path) -> Result<Vec<Record>, LoadError> {
    let document: serde_json::Value = serde_json::from_str(text).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let shape_err = || LoadError::JsonShape {
        path: path.to_path_buf(),
    };
    let items = document.as_array().ok_or_else(shape_err)?;
    let mut rows = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let object = item.as_object().ok_or_else(shape_err)?;
        let mut row = Record::new();
        for (name, json) in object {
            let Some(field) = table.field(name) else {
                continue;
            };
            let value = convert_json(json, field.data_type).ok_or_else(|| LoadError::InvalidCell {
                table: table.id.clone(),
                field: name.clone(),
                row: idx + 1,
                raw: json.to_string(),
                expected: field.data_type,
            })?;
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Loads `<dir>/<table_id>.csv` (or `.json`) for each requested table.
pub fn load_tables<'a, I>(dir: &Path, catalog: &dyn SchemaCatalog, table_ids: I) -> Result<TableRows, LoadError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut loaded = TableRows::new();
    for table_id in table_ids {
        if loaded.contains_key(table_id) {
            continue;
        }
        let table = catalog.table(table_id).ok_or_else(|| LoadError::UnknownTable {
            table: table_id.to_owned(),
        })?;
        let rows = load_table(dir, table)?;
        debug!(table = table_id, rows = rows.len(), "rows.loaded");
        loaded.insert(table_id.to_owned(), rows);
    }
    Ok(loaded)
}

fn load_table(dir: &Path, table: &TableDescriptor) -> Result<Vec<Record>, LoadError> {
    let csv_path = dir.join(format!("{}.csv", table.id));
    if csv_path.is_file() {
        let file = fs::File::open(&csv_path).map_err(|source| LoadError::Io {
            path: csv_path.clone(),
            source,
        })?;
        return read_csv(file, table, &csv_path);
    }
    let json_path = dir.join(format!("{}.json", table.id));
    if json_path.is_file() {
        let text = fs::read_to_string(&json_path).map_err(|source| LoadError::Io {
            path: json_path.clone(),
            source,
        })?;
        return read_json(&text, table, &json_path);
    }
    Err(LoadError::MissingTable {
        table: table.id.clone(),
        dir: dir.to_path_buf(),
    })
}

/// Converts one text cell; an empty cell is null.
pub fn convert_cell(raw: &str, data_type: DataType) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }
    match data_type {
        DataType::String => Some(Value::String(raw.to_owned())),
        DataType::Number => trimmed.parse::<f64>().ok().map(Value::Number),
        DataType::Date => parse_date(trimmed).map(Value::Date),
        DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
    }
}

fn convert_json(json: &serde_json::Value, data_type: DataType) -> Option<Value> {
    match (json, data_type) {
        (serde_json::Value::Null, _) => Some(Value::Null),
        (serde_json::Value::String(text), DataType::String) => Some(Value::String(text.clone())),
        (serde_json::Value::String(text), _) => convert_cell(text, data_type),
        (serde_json::Value::Number(n), DataType::Number) => n.as_f64().map(Value::Number),
        (serde_json::Value::Number(n), DataType::String) => Some(Value::String(n.to_string())),
        (serde_json::Value::Bool(b), DataType::Boolean) => Some(Value::Bool(*b)),
        (serde_json::Value::Bool(b), DataType::String) => Some(Value::String(b.to_string())),
        _ => None,
    }
}
