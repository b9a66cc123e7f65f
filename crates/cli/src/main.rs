use clap::{Parser, Subcommand};
use scape_core::{
    constants::DEFAULT_DATA_DIR, max_allocation_attempts_from_env_value,
    max_upload_bytes_from_env_value, reconcile, CoreConfig, JsonCatalog, NonEmptyText,
    ReconcileMode, UploadId, UploadRequest, UploadService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scape")]
#[command(about = "Scape media catalog CLI")]
struct Cli {
    /// Data directory holding staging/, uploads/ and catalog.json
    #[arg(long, env = "SCAPE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all uploads
    List,
    /// Admit an image file from disk, as if it had been uploaded
    Ingest {
        /// Image file to ingest
        path: PathBuf,
        /// Account the upload belongs to
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Delete an upload
    Delete {
        /// Upload id
        id: String,
        /// Account requesting the deletion; must own the upload
        #[arg(long)]
        owner: String,
    },
    /// Compare the catalog with the data directory
    Reconcile {
        /// Remove stale staging and temp files
        #[arg(long)]
        repair: bool,
        /// With --repair, also remove canonical files that have no catalog record
        #[arg(long, requires = "repair")]
        purge_orphans: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("scape=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(command) = cli.command else {
        println!("No command given. Run `scape --help` for usage.");
        return Ok(());
    };

    let cfg = CoreConfig::new(
        cli.data_dir,
        max_allocation_attempts_from_env_value(std::env::var("SCAPE_MAX_ALLOCATION_ATTEMPTS").ok())?,
        max_upload_bytes_from_env_value(std::env::var("SCAPE_MAX_UPLOAD_BYTES").ok())?,
    )?;
    cfg.ensure_layout()?;
    let cfg = Arc::new(cfg);
    let catalog = Arc::new(JsonCatalog::open(cfg.catalog_path())?);

    match command {
        Commands::List => {
            let service = UploadService::new(cfg, catalog)?;
            let records = service.list()?;
            if records.is_empty() {
                println!("No uploads found.");
            } else {
                for record in records {
                    println!(
                        "ID: {}, Owner: {}, Title: {}, File: {}, Created: {}",
                        record.id,
                        record.owner_id,
                        record.title,
                        record.filename,
                        record.created_at.to_rfc3339()
                    );
                }
            }
        }
        Commands::Ingest {
            path,
            owner,
            title,
            description,
            tags,
        } => {
            let service = UploadService::new(cfg, catalog)?;
            let bytes = std::fs::read(&path)?;
            let request = UploadRequest {
                owner_id: NonEmptyText::new(&owner)?,
                title,
                description,
                tags,
                original_filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                bytes,
            };
            match service.upload(request) {
                Ok(record) => println!("Ingested {} as {}", path.display(), record.filename),
                Err(e) => eprintln!("Error ingesting {}: {}", path.display(), e),
            }
        }
        Commands::Delete { id, owner } => {
            let service = UploadService::new(cfg, catalog)?;
            let id: UploadId = id.parse()?;
            match service.delete(id, &NonEmptyText::new(&owner)?) {
                Ok(record) => println!("Deleted upload {} ({})", record.id, record.filename),
                Err(e) => eprintln!("Error deleting upload {}: {}", id, e),
            }
        }
        Commands::Reconcile {
            repair,
            purge_orphans,
        } => {
            let mode = if repair {
                ReconcileMode::Repair { purge_orphans }
            } else {
                ReconcileMode::Report
            };
            let report = reconcile(&cfg, catalog.as_ref(), mode)?;

            for id in &report.orphan_files {
                println!("orphan file: {id}.png");
            }
            for id in &report.dangling_records {
                println!("record without file: {id}");
            }
            for path in &report.stale_staging_files {
                println!("stale staging file: {}", path.display());
            }
            for path in &report.stale_temp_files {
                println!("stale temp file: {}", path.display());
            }
            if report.is_clean() {
                println!("Catalog and data directory are consistent.");
            }
            if repair {
                println!("Removed {} file(s).", report.removed);
            }
        }
    }

    Ok(())
}
