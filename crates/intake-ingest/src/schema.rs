//! Dimension schemas, the validation capability and the schema catalog
//!
//! A schema is opaque JSON to the pipeline. Only two things look inside it:
//! the validator, and the formatting helpers, which read `properties` to
//! order columns and to coerce values to the declared types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::IngestResult;
use crate::reader::{parse_number, NormalizedRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSchema {
    pub id: i64,
    pub name: String,
    pub schema: Value,
}

impl DimensionSchema {
    pub fn new(id: i64, name: impl Into<String>, schema: Value) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
        }
    }

    /// Declared properties in document order, if any.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }
}

/// One reason a record failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// JSON pointer of the offending value, empty for the record itself
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// `"<path> <message>"` with the leading `/` of the pointer dropped.
    pub fn describe(&self) -> String {
        let path = self.path.strip_prefix('/').unwrap_or(&self.path);
        if path.is_empty() {
            self.message.clone()
        } else {
            format!("{} {}", path, self.message)
        }
    }
}

/// Flatten field errors into one `error_description` cell.
pub fn error_description(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validation capability: returns every error, in order, or none.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &DimensionSchema, record: &NormalizedRecord) -> Vec<FieldError>;
}

/// [`SchemaValidator`] backed by the `jsonschema` crate.
///
/// Compiled validators are cached per schema document, so a schema is
/// compiled once however many chunks reference it.
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: Mutex<HashMap<String, Arc<jsonschema::Validator>>>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, schema: &Value) -> Result<Arc<jsonschema::Validator>, String> {
        let key = schema.to_string();
        let mut cache = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(validator) = cache.get(&key) {
            return Ok(Arc::clone(validator));
        }

        let validator = Arc::new(jsonschema::validator_for(schema).map_err(|e| e.to_string())?);
        debug!(cached = cache.len() + 1, "Compiled dimension schema");
        cache.insert(key, Arc::clone(&validator));
        Ok(validator)
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, schema: &DimensionSchema, record: &NormalizedRecord) -> Vec<FieldError> {
        let validator = match self.compile(&schema.schema) {
            Ok(v) => v,
            Err(message) => {
                warn!(dimension = %schema.name, error = %message, "Dimension schema does not compile");
                return vec![FieldError::new("", format!("invalid schema: {}", message))];
            },
        };

        let instance = Value::Object(record.clone());
        validator
            .iter_errors(&instance)
            .map(|e| FieldError::new(e.instance_path.to_string(), e.to_string()))
            .collect()
    }
}

fn declared_type(definition: &Value) -> Option<&str> {
    match definition.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

/// Convert `value` to the JSON type named by `type_name`, or return it as is.
fn coerce_value(value: Value, type_name: Option<&str>) -> Value {
    match (type_name, value) {
        (Some("string"), Value::Number(n)) => Value::String(n.to_string()),
        (Some("string"), Value::Bool(b)) => Value::String(b.to_string()),
        (Some("integer"), Value::String(s)) => match parse_number(&s) {
            Some(n) if n.is_i64() || n.is_u64() => Value::Number(n),
            _ => Value::String(s),
        },
        (Some("number"), Value::String(s)) => {
            parse_number(&s).map(Value::Number).unwrap_or(Value::String(s))
        },
        (Some("boolean"), Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (_, value) => value,
    }
}

/// Coerce each declared property of `record` to its schema type in place.
///
/// Values that cannot be converted are left alone for the validator to
/// report.
pub fn coerce_by_schema(record: &mut NormalizedRecord, schema: &DimensionSchema) {
    let Some(properties) = schema.properties() else {
        return;
    };
    for (column, definition) in properties {
        if let Some(value) = record.get_mut(column) {
            let taken = std::mem::take(value);
            *value = coerce_value(taken, declared_type(definition));
        }
    }
}

/// Reshape a valid record into the schema's column order and types.
///
/// Declared properties come first, in declaration order; a property the
/// record lacks is written as an empty cell. Columns the schema does not
/// declare follow in their original order.
pub fn format_by_schema(mut record: NormalizedRecord, schema: &DimensionSchema) -> NormalizedRecord {
    let Some(properties) = schema.properties() else {
        return record;
    };

    let mut formatted = NormalizedRecord::new();
    for (column, definition) in properties {
        let value = record
            .shift_remove(column)
            .map(|v| coerce_value(v, declared_type(definition)))
            .unwrap_or_else(|| Value::String(String::new()));
        formatted.insert(column.clone(), value);
    }
    formatted.extend(record);
    formatted
}

/// Where dimension schemas come from.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// The schema of `name`, if exactly one dimension carries that name.
    async fn dimension_by_name(&self, name: &str) -> IngestResult<Option<DimensionSchema>>;

    async fn dimension_by_id(&self, id: i64) -> IngestResult<Option<DimensionSchema>>;
}

/// Catalog reading the `dimension_grammar` table.
#[derive(Clone)]
pub struct PgSchemaCatalog {
    pool: PgPool,
}

impl PgSchemaCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn single(rows: Vec<sqlx::postgres::PgRow>) -> IngestResult<Option<DimensionSchema>> {
        match rows.as_slice() {
            [row] => Ok(Some(DimensionSchema {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                schema: row.try_get("schema")?,
            })),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl SchemaCatalog for PgSchemaCatalog {
    async fn dimension_by_name(&self, name: &str) -> IngestResult<Option<DimensionSchema>> {
        let rows = sqlx::query("SELECT id, name, schema FROM dimension_grammar WHERE name = $1")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        Self::single(rows)
    }

    async fn dimension_by_id(&self, id: i64) -> IngestResult<Option<DimensionSchema>> {
        let rows = sqlx::query("SELECT id, name, schema FROM dimension_grammar WHERE id = $1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Self::single(rows)
    }
}

/// Catalog over a fixed set of schemas, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaCatalog {
    schemas: Vec<DimensionSchema>,
}

impl StaticSchemaCatalog {
    pub fn new(schemas: Vec<DimensionSchema>) -> Self {
        Self { schemas }
    }
}

#[async_trait]
impl SchemaCatalog for StaticSchemaCatalog {
    async fn dimension_by_name(&self, name: &str) -> IngestResult<Option<DimensionSchema>> {
        let mut matching = self.schemas.iter().filter(|s| s.name == name);
        match (matching.next(), matching.next()) {
            (Some(schema), None) => Ok(Some(schema.clone())),
            _ => Ok(None),
        }
    }

    async fn dimension_by_id(&self, id: i64) -> IngestResult<Option<DimensionSchema>> {
        Ok(self.schemas.iter().find(|s| s.id == id).cloned())
    }
}
