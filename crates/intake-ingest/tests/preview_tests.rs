//! Validate-only dimension preview

mod common;

use common::write_csv;
use intake_ingest::partition::ERROR_DESCRIPTION;
use intake_ingest::schema::StaticSchemaCatalog;
use intake_ingest::{DimensionPreview, DimensionSchema, IngestError, JsonSchemaValidator};
use serde_json::json;
use std::sync::Arc;

fn preview() -> DimensionPreview {
    let schema = DimensionSchema::new(
        7,
        "block",
        json!({
            "type": "object",
            "properties": {
                "block_id": { "type": "integer" },
                "block_name": { "type": "string", "minLength": 1 },
                "is_urban": { "type": "boolean" }
            },
            "required": ["block_id", "block_name"]
        }),
    );
    DimensionPreview::new(
        Arc::new(StaticSchemaCatalog::new(vec![schema])),
        Arc::new(JsonSchemaValidator::new()),
    )
}

fn rows() -> Vec<String> {
    vec![
        "1,Anekal,true".into(),
        "two,Hoskote,false".into(),
        "3,,yes".into(),
        "4,Nelamangala,FALSE".into(),
    ]
}

#[tokio::test]
async fn test_preview_annotates_rows_and_consumes_file() {
    let dir = tempfile::tempdir().unwrap();
    let upload = write_csv(dir.path(), "block.csv", "block_id,block_name,is_urban", &rows());

    let annotated = preview().run(7, &upload.path).await.unwrap();

    assert_eq!(annotated.len(), 4);
    assert_eq!(
        annotated.iter().map(|r| r.valid).collect::<Vec<_>>(),
        [true, false, false, true]
    );
    assert_eq!(annotated[0].record["block_id"], json!(1));
    assert_eq!(annotated[0].record["is_urban"], json!(true));
    assert_eq!(annotated[3].record["is_urban"], json!(false));
    assert!(annotated[0].record.get(ERROR_DESCRIPTION).is_none());

    let description = annotated[2].record[ERROR_DESCRIPTION].as_str().unwrap();
    assert!(description.contains("block_name "));
    assert!(description.contains("is_urban "));
    assert!(description.contains(", "));

    assert!(!upload.path.exists());
}

#[tokio::test]
async fn test_preview_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let preview = preview();

    let first = write_csv(dir.path(), "a.csv", "block_id,block_name,is_urban", &rows());
    let second = write_csv(dir.path(), "b.csv", "block_id,block_name,is_urban", &rows());

    let a = preview.run(7, &first.path).await.unwrap();
    let b = preview.run(7, &second.path).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_unknown_schema_keeps_file() {
    let dir = tempfile::tempdir().unwrap();
    let upload = write_csv(dir.path(), "block.csv", "block_id,block_name,is_urban", &rows());

    let err = preview().run(99, &upload.path).await.unwrap_err();

    assert!(matches!(err, IngestError::SchemaNotFound(99)));
    assert!(err.is_client_error());
    assert!(upload.path.exists());
}

#[tokio::test]
async fn test_unreadable_file_is_still_removed() {
    let dir = tempfile::tempdir().unwrap();
    let upload = write_csv(
        dir.path(),
        "ragged.csv",
        "block_id,block_name,is_urban",
        &["1,Anekal".to_string()],
    );

    let err = preview().run(7, &upload.path).await.unwrap_err();

    assert!(matches!(err, IngestError::StreamIo(_)));
    assert!(!upload.path.exists());
}
