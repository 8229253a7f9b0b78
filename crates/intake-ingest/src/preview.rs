//! Validate-only path
//!
//! Reads a whole file against a dimension schema and returns every row with
//! its verdict. Unlike the batched pipeline nothing is dispatched, tracked or
//! written, so rows are held in memory and the path suits preview-sized
//! inputs only.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{IngestError, IngestResult};
use crate::partition::ERROR_DESCRIPTION;
use crate::pipeline::remove_temp_file;
use crate::reader::{NormalizedRecord, RowReader};
use crate::schema::{coerce_by_schema, error_description, DimensionSchema, SchemaCatalog, SchemaValidator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRow {
    /// Line of the row in the source file
    pub line: u64,
    pub valid: bool,
    /// Row coerced to the schema types, with `error_description` when invalid
    pub record: NormalizedRecord,
}

/// Validate every row of `path` in file order.
pub async fn validate_file(
    path: &Path,
    schema: &DimensionSchema,
    validator: &dyn SchemaValidator,
) -> IngestResult<Vec<AnnotatedRow>> {
    let mut reader = RowReader::open(path).await?;
    let headers = reader.headers().to_vec();
    let mut rows = Vec::new();

    while let Some(raw) = reader.next_row().await? {
        let mut record: NormalizedRecord = headers
            .iter()
            .cloned()
            .zip(raw.cells.into_iter().map(Value::String))
            .collect();
        coerce_by_schema(&mut record, schema);

        let errors = validator.validate(schema, &record);
        let valid = errors.is_empty();
        if !valid {
            record.insert(
                ERROR_DESCRIPTION.to_string(),
                Value::String(error_description(&errors)),
            );
        }

        rows.push(AnnotatedRow {
            line: raw.line,
            valid,
            record,
        });
    }

    Ok(rows)
}

pub struct DimensionPreview {
    catalog: Arc<dyn SchemaCatalog>,
    validator: Arc<dyn SchemaValidator>,
}

impl DimensionPreview {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, validator: Arc<dyn SchemaValidator>) -> Self {
        Self { catalog, validator }
    }

    /// Validate the uploaded file at `path` against schema `id`.
    ///
    /// Once the schema is found the file is consumed: it is removed whether
    /// or not validation succeeds.
    #[instrument(skip(self))]
    pub async fn run(&self, id: i64, path: &Path) -> IngestResult<Vec<AnnotatedRow>> {
        let schema = self
            .catalog
            .dimension_by_id(id)
            .await?
            .ok_or(IngestError::SchemaNotFound(id))?;

        let result = validate_file(path, &schema, self.validator.as_ref()).await;
        remove_temp_file(path).await;

        if let Ok(rows) = &result {
            let invalid = rows.iter().filter(|r| !r.valid).count();
            info!(rows = rows.len(), invalid, dimension = %schema.name, "File validated");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JsonSchemaValidator;
    use serde_json::json;
    use std::io::Write;

    fn schema() -> DimensionSchema {
        DimensionSchema::new(
            5,
            "school",
            json!({
                "type": "object",
                "properties": {
                    "school_id": { "type": "integer" },
                    "school_name": { "type": "string", "minLength": 1 }
                },
                "required": ["school_id", "school_name"]
            }),
        )
    }

    #[tokio::test]
    async fn test_rows_are_coerced_and_annotated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "school_id,school_name\n10,Govt HS\nx1,Model School\n12,").unwrap();

        let rows = validate_file(file.path(), &schema(), &JsonSchemaValidator::new())
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].valid);
        assert_eq!(rows[0].record["school_id"], json!(10));
        assert!(!rows[1].valid);
        assert!(rows[1].record[ERROR_DESCRIPTION]
            .as_str()
            .unwrap()
            .starts_with("school_id "));
        assert!(!rows[2].valid);
        assert_eq!(rows[2].line, 4);
    }
}
