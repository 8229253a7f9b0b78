//! Incremental CSV row reader and cell normalizer
//!
//! [`RowReader`] pulls one row at a time from disk. Nothing is read ahead of
//! the caller, which is what lets the pipeline suspend the producer simply by
//! not asking for the next row while a batch is in flight.

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::fs::File;

/// One input row after normalization, keyed by header in column order.
pub type NormalizedRecord = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv_async::Error,
    },
}

/// A row exactly as it appeared in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number of the row in the source file
    pub line: u64,
    pub cells: Vec<String>,
}

pub struct RowReader {
    path: PathBuf,
    inner: AsyncReader<File>,
    headers: Vec<String>,
    record: StringRecord,
    rows_read: u64,
}

impl RowReader {
    /// Open `path` and consume its header row.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| ReadError::Open {
            path: path.clone(),
            source,
        })?;

        let mut inner = AsyncReaderBuilder::new()
            .has_headers(true)
            .create_reader(file);

        let headers = inner
            .headers()
            .await
            .map_err(|source| ReadError::Csv {
                path: path.clone(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        Ok(Self {
            path,
            inner,
            headers,
            record: StringRecord::new(),
            rows_read: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next data row, or `None` at end of file.
    ///
    /// A row whose field count differs from the header is an error, as is
    /// invalid UTF-8. Either one ends the file.
    pub async fn next_row(&mut self) -> Result<Option<RawRow>, ReadError> {
        let more = self
            .inner
            .read_record(&mut self.record)
            .await
            .map_err(|source| ReadError::Csv {
                path: self.path.clone(),
                source,
            })?;

        if !more {
            return Ok(None);
        }

        self.rows_read += 1;
        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read + 1);

        Ok(Some(RawRow {
            line,
            cells: self.record.iter().map(str::to_string).collect(),
        }))
    }
}

/// Which columns are eligible for numeric coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionRule {
    /// Columns whose name contains `_id` or `_year` keep their text.
    #[default]
    ExcludeIdentifiers,
    /// Every numeric-looking cell becomes a number.
    All,
}

impl FromStr for CoercionRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclude-identifiers" | "exclude_identifiers" => Ok(CoercionRule::ExcludeIdentifiers),
            "all" => Ok(CoercionRule::All),
            other => Err(format!("unknown coercion rule '{}'", other)),
        }
    }
}

const IDENTIFIER_MARKERS: [&str; 2] = ["_id", "_year"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    rule: CoercionRule,
}

impl Normalizer {
    pub fn new(rule: CoercionRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> CoercionRule {
        self.rule
    }

    pub fn normalize(&self, headers: &[String], row: &RawRow) -> NormalizedRecord {
        headers
            .iter()
            .zip(row.cells.iter())
            .map(|(column, cell)| (column.clone(), self.normalize_cell(column, cell)))
            .collect()
    }

    pub fn normalize_cell(&self, column: &str, cell: &str) -> Value {
        let keep_text = self.rule == CoercionRule::ExcludeIdentifiers
            && IDENTIFIER_MARKERS.iter().any(|m| column.contains(m));

        if keep_text {
            return Value::String(cell.to_string());
        }

        parse_number(cell)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string()))
    }
}

/// Parse a cell as a finite number. Integral values come back as integers.
pub fn parse_number(cell: &str) -> Option<Number> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::from(i));
    }

    let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
    // 2^53: beyond this an f64 no longer holds every integer exactly
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Some(Number::from(f as i64));
    }
    Number::from_f64(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn row(cells: &[&str]) -> RawRow {
        RawRow {
            line: 2,
            cells: cells.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_numeric_coercion() {
        let normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize_cell("count", "123"), json!(123));
        assert_eq!(normalizer.normalize_cell("count", "12a"), json!("12a"));
        assert_eq!(normalizer.normalize_cell("ratio", "0.25"), json!(0.25));
        assert_eq!(normalizer.normalize_cell("count", " 7 "), json!(7));
        assert_eq!(normalizer.normalize_cell("count", "1e3"), json!(1000));
        assert_eq!(normalizer.normalize_cell("count", "-4"), json!(-4));
    }

    #[test]
    fn test_blank_and_non_finite_cells_stay_text() {
        let normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize_cell("count", ""), json!(""));
        assert_eq!(normalizer.normalize_cell("count", "  "), json!("  "));
        assert_eq!(normalizer.normalize_cell("count", "NaN"), json!("NaN"));
        assert_eq!(normalizer.normalize_cell("count", "inf"), json!("inf"));
    }

    #[test]
    fn test_identifier_columns_keep_text() {
        let normalizer = Normalizer::new(CoercionRule::ExcludeIdentifiers);
        assert_eq!(normalizer.normalize_cell("user_id", "123"), json!("123"));
        assert_eq!(normalizer.normalize_cell("academic_year", "2023"), json!("2023"));
        assert_eq!(normalizer.normalize_cell("school_identity", "007"), json!("007"));
    }

    #[test]
    fn test_coerce_all_rule_ignores_column_names() {
        let normalizer = Normalizer::new(CoercionRule::All);
        assert_eq!(normalizer.normalize_cell("user_id", "123"), json!(123));
        assert_eq!(normalizer.normalize_cell("academic_year", "2023"), json!(2023));
    }

    #[test]
    fn test_normalize_keeps_column_order() {
        let headers = vec!["state_id".to_string(), "name".to_string(), "total".to_string()];
        let record = Normalizer::default().normalize(&headers, &row(&["29", "Karnataka", "41"]));

        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, ["state_id", "name", "total"]);
        assert_eq!(record["state_id"], json!("29"));
        assert_eq!(record["total"], json!(41));
    }

    #[test]
    fn test_coercion_rule_from_str() {
        assert_eq!("all".parse::<CoercionRule>().unwrap(), CoercionRule::All);
        assert_eq!(
            "exclude-identifiers".parse::<CoercionRule>().unwrap(),
            CoercionRule::ExcludeIdentifiers
        );
        assert!("none".parse::<CoercionRule>().is_err());
    }

    #[tokio::test]
    async fn test_reader_yields_rows_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name\n1,a\n2,b\n3,c").unwrap();

        let mut reader = RowReader::open(file.path()).await.unwrap();
        assert_eq!(reader.headers(), ["id", "name"]);

        let mut names = Vec::new();
        while let Some(row) = reader.next_row().await.unwrap() {
            names.push(row.cells[1].clone());
        }
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(reader.rows_read(), 3);
    }

    #[tokio::test]
    async fn test_reader_rejects_ragged_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name\n1,a\n2,b,extra").unwrap();

        let mut reader = RowReader::open(file.path()).await.unwrap();
        assert!(reader.next_row().await.unwrap().is_some());
        assert!(matches!(reader.next_row().await, Err(ReadError::Csv { .. })));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let result = RowReader::open("/nonexistent/intake/upload.csv").await;
        assert!(matches!(result, Err(ReadError::Open { .. })));
    }
}
