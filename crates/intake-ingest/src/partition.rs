//! Split records into valid and invalid sets against a dimension schema

use serde_json::Value;

use crate::reader::NormalizedRecord;
use crate::schema::{error_description, format_by_schema, DimensionSchema, SchemaValidator};

/// Column appended to rejected records
pub const ERROR_DESCRIPTION: &str = "error_description";

#[derive(Debug, Default)]
pub struct Partition {
    /// Accepted records, reshaped by [`format_by_schema`]
    pub valid: Vec<NormalizedRecord>,
    /// Rejected records, each carrying [`ERROR_DESCRIPTION`] as its last column
    pub invalid: Vec<NormalizedRecord>,
}

impl Partition {
    pub fn valid_count(&self) -> u64 {
        self.valid.len() as u64
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid.len() as u64
    }
}

/// Validate every record, keeping input order within each side.
pub fn partition(
    schema: &DimensionSchema,
    validator: &dyn SchemaValidator,
    records: Vec<NormalizedRecord>,
) -> Partition {
    let mut out = Partition::default();

    for mut record in records {
        let errors = validator.validate(schema, &record);
        if errors.is_empty() {
            out.valid.push(format_by_schema(record, schema));
        } else {
            // shift_remove keeps the remaining columns in order
            record.shift_remove(ERROR_DESCRIPTION);
            record.insert(
                ERROR_DESCRIPTION.to_string(),
                Value::String(error_description(&errors)),
            );
            out.invalid.push(record);
        }
    }

    out
}
