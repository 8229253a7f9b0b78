//! Intake Ingest - CSV batch ingestion tool

use anyhow::{bail, Context, Result};
use clap::Parser;
use intake_common::logging::{init_logging, LogConfig, LogLevel};
use intake_common::IngestionType;
use intake_ingest::artifact::ArtifactSink;
use intake_ingest::db::{create_pool, DbConfig};
use intake_ingest::schema::{PgSchemaCatalog, StaticSchemaCatalog};
use intake_ingest::storage::{build_artifact_store, StorageConfig};
use intake_ingest::{
    CsvImportRequest, DimensionConsumer, DimensionIngestor, DimensionPreview, DimensionSchema,
    HttpDispatcher, IngestConfig, IngestionApiClient, IngestionPipeline, JsonSchemaValidator,
    MemoryTrackerStore, Normalizer, PgTrackerStore, SchemaCatalog, TrackerStore, UploadedFile,
};
use serde::Serialize;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "intake-ingest")]
#[command(author, version, about = "Streaming CSV batch ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Ingest an event, dataset or dimension file
    Import {
        /// Ingestion type: event, dataset or dimension
        #[arg(short = 't', long = "type")]
        ingestion_type: String,

        /// Event, dataset or dimension name
        #[arg(short, long)]
        name: String,

        /// CSV file to ingest; it is removed once processed
        #[arg(short, long)]
        file: PathBuf,

        /// Keep the tracker in memory instead of Postgres
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a dimension file and upload its artifacts
    Dimension {
        /// Dimension name
        #[arg(short, long)]
        name: String,

        /// CSV file to ingest; it is removed once processed
        #[arg(short, long)]
        file: PathBuf,

        /// Read the schema from a JSON file instead of the catalog
        #[arg(long)]
        schema_file: Option<PathBuf>,

        /// Keep the tracker in memory instead of Postgres
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a file against a dimension schema without ingesting it
    Validate {
        /// Dimension schema id
        #[arg(long)]
        id: i64,

        /// CSV file to validate; it is removed afterwards
        #[arg(short, long)]
        file: PathBuf,

        /// Read the schema from a JSON file instead of the catalog
        #[arg(long)]
        schema_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("intake-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::load()?;

    match cli.command {
        Command::Import {
            ingestion_type,
            name,
            file,
            dry_run,
        } => {
            if ingestion_type.parse::<IngestionType>().ok() == Some(IngestionType::Dimension) {
                run_dimension(&config, &name, &file, None, dry_run).await?;
            } else {
                run_import(&config, &ingestion_type, &name, &file, dry_run).await?;
            }
        },
        Command::Dimension {
            name,
            file,
            schema_file,
            dry_run,
        } => {
            run_dimension(&config, &name, &file, schema_file.as_deref(), dry_run).await?;
        },
        Command::Validate {
            id,
            file,
            schema_file,
        } => {
            let catalog: Arc<dyn SchemaCatalog> = match schema_file {
                Some(path) => Arc::new(StaticSchemaCatalog::new(vec![read_schema_file(
                    &path, id, "preview",
                )?])),
                None => Arc::new(PgSchemaCatalog::new(connect(false).await?)),
            };
            let preview = DimensionPreview::new(catalog, Arc::new(JsonSchemaValidator::new()));
            let rows = preview.run(id, &file).await?;
            print_json(&rows)?;
        },
    }

    Ok(())
}

async fn run_import(
    config: &IngestConfig,
    ingestion_type: &str,
    name: &str,
    file: &Path,
    dry_run: bool,
) -> Result<()> {
    let (tracker, _) = tracker_store(dry_run).await?;
    let pipeline = pipeline(config, tracker);
    let client = IngestionApiClient::new(config.api.base_url.clone(), config.api.timeout())?;
    let mut dispatcher = HttpDispatcher::new(client);

    info!(ingestion_type, name, file = %file.display(), "Importing file");

    let request = CsvImportRequest::new(ingestion_type, name);
    let upload = uploaded_file(file)?;
    let outcome = pipeline.run(&request, upload, &mut dispatcher).await?;
    print_json(&outcome)
}

async fn run_dimension(
    config: &IngestConfig,
    name: &str,
    file: &Path,
    schema_file: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let (tracker, pool) = tracker_store(dry_run).await?;

    let catalog: Arc<dyn SchemaCatalog> = match (schema_file, pool) {
        (Some(path), _) => Arc::new(StaticSchemaCatalog::new(vec![read_schema_file(path, 0, name)?])),
        (None, Some(pool)) => Arc::new(PgSchemaCatalog::new(pool)),
        (None, None) => bail!("--schema-file is required with --dry-run"),
    };

    let store = build_artifact_store(StorageConfig::from_env()?).await?;
    let sink = ArtifactSink::new(&config.artifacts.error_dir, &config.artifacts.input_dir);
    let ingestor = Arc::new(DimensionIngestor::new(
        catalog,
        Arc::new(JsonSchemaValidator::new()),
        tracker.clone(),
        sink,
        store,
    ));

    info!(dimension = name, file = %file.display(), "Importing dimension file");

    let pipeline = pipeline(config, tracker);
    let mut consumer = DimensionConsumer::new(ingestor);
    let request = CsvImportRequest::new(IngestionType::Dimension.as_str(), name);
    let outcome = pipeline.run(&request, uploaded_file(file)?, &mut consumer).await?;
    print_json(&outcome)
}

fn pipeline(config: &IngestConfig, tracker: Arc<dyn TrackerStore>) -> IngestionPipeline {
    IngestionPipeline::new(tracker, config.batch_limit)
        .with_normalizer(Normalizer::new(config.coercion_rule))
}

fn uploaded_file(path: &Path) -> Result<UploadedFile> {
    UploadedFile::from_path(path).with_context(|| format!("Cannot read {}", path.display()))
}

async fn connect(run_migrations: bool) -> Result<PgPool> {
    let pool = create_pool(&DbConfig::from_env()?).await?;
    if run_migrations {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
    }
    Ok(pool)
}

async fn tracker_store(dry_run: bool) -> Result<(Arc<dyn TrackerStore>, Option<PgPool>)> {
    if dry_run {
        info!("Dry run: file tracker kept in memory");
        return Ok((Arc::new(MemoryTrackerStore::new()), None));
    }
    let pool = connect(true).await?;
    Ok((Arc::new(PgTrackerStore::new(pool.clone())), Some(pool)))
}

fn read_schema_file(path: &Path, id: i64, name: &str) -> Result<DimensionSchema> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read schema file {}", path.display()))?;
    let schema = serde_json::from_str(&text)
        .with_context(|| format!("Schema file {} is not valid JSON", path.display()))?;
    Ok(DimensionSchema::new(id, name, schema))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
