//! Staged-input parsing contract.
//!
//! The upload side stages instrument exports as files; the import executor
//! turns one into a [`Table`] through this trait. The JSON-lines parser is the
//! dev/test implementation; spreadsheet formats plug in behind the same trait.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use labtrace_jobs::JobError;

use crate::table::{Row, Table};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed input at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl From<ParseError> for JobError {
    fn from(err: ParseError) -> Self {
        match err {
            // The staged file was validated at enqueue; failing to read it now
            // is a transient filesystem condition.
            ParseError::Io { .. } => JobError::Transient(err.to_string()),
            ParseError::Malformed { .. } => JobError::Terminal(err.to_string()),
        }
    }
}

/// Turns a staged file into a finite measurement table. Implementations must
/// be restartable: parsing the same file twice yields the same table.
#[async_trait]
pub trait RowParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<Table, ParseError>;
}

/// One JSON object per line; columns are the union of keys in first-seen
/// order. Blank lines are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesParser;

#[async_trait]
impl RowParser for JsonLinesParser {
    async fn parse(&self, path: &Path) -> Result<Table, ParseError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ParseError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Row> = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: JsonValue =
                serde_json::from_str(line).map_err(|e| ParseError::Malformed {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            let JsonValue::Object(row) = value else {
                return Err(ParseError::Malformed {
                    line: idx + 1,
                    message: "expected a JSON object".into(),
                });
            };
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
            rows.push(row);
        }

        Ok(Table::new(columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn parses_json_lines_preserving_column_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Solution Label": "STD 1", "Type": "Std", "Cu": 50.0}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"Solution Label": "S-001", "Type": "Samp", "Cu": 12.5, "Zn": 7.5}}"#)
            .unwrap();

        let table = JsonLinesParser.parse(file.path()).await.unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns, vec!["Solution Label", "Type", "Cu", "Zn"]);
    }

    #[tokio::test]
    async fn malformed_line_reports_its_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Solution Label": "STD 1"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let err = JsonLinesParser.parse(file.path()).await.unwrap_err();
        assert!(matches!(err, ParseError::Malformed { line: 2, .. }));
        // A broken file is a terminal failure, not a retry.
        assert!(!JobError::from(err).is_retryable());
    }

    #[tokio::test]
    async fn unreadable_path_is_transient() {
        let err = JsonLinesParser
            .parse(Path::new("/nonexistent/run.jsonl"))
            .await
            .unwrap_err();
        assert!(JobError::from(err).is_retryable());
    }

    #[tokio::test]
    async fn non_object_lines_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[1, 2, 3]").unwrap();

        let err = JsonLinesParser.parse(file.path()).await.unwrap_err();
        assert!(matches!(err, ParseError::Malformed { line: 1, .. }));
    }
}
