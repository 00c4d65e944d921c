//! # geonadir-upload CLI Interface
//!
//! Command parsing, argument validation and the async [`run`] entrypoint.
//! Everything that decides *what* gets uploaded lives in
//! `geonadir-upload-core`; this module turns arguments into
//! [`DatasetSpec`]s, wires the [`GeonadirClient`] in and reports the outcome.
//!
//! ## Subcommands
//! - `upload-dataset`: upload local directories or remote catalog collections,
//!   optionally resuming into existing datasets.
//! - `search-dataset`: free-text dataset search.
//! - `get-dataset-info`: metadata of one dataset.
//!
//! [`run`] is public so integration tests can drive the CLI without a process.

use crate::load_config::{
    load_metadata, load_settings, resolve_token, sanitize_dataset_name, MetadataCatalog,
    TOKEN_ENV_VAR,
};
use crate::upload::{GeonadirClient, DEFAULT_BASE_URL};
use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use geonadir_upload_core::batch::{run_batch, worker_count};
use geonadir_upload_core::config::EngineSettings;
use geonadir_upload_core::contract::{DatasetId, ReportSink};
use geonadir_upload_core::job::{DatasetSpec, UploadContext};
use geonadir_upload_core::report::CsvReportSink;
use geonadir_upload_core::source::{DatasetSource, LocalDirectorySource, RemoteCatalogSource};
use std::path::PathBuf;

/// CLI for geonadir-upload: resumable bulk upload of geotagged image datasets.
#[derive(Parser, Debug)]
#[clap(
    name = "geonadir-upload",
    version,
    about = "Upload image datasets to Geonadir, resuming where a previous run stopped"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload one or more datasets
    UploadDataset(UploadArgs),
    /// Search public datasets by free text
    SearchDataset {
        /// Text to search for
        search_str: String,
        #[clap(long, short = 'u', default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Show the metadata of one dataset
    GetDatasetInfo {
        /// Dataset (project) id
        project_id: DatasetId,
        #[clap(long, short = 'u', default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct UploadArgs {
    /// New dataset from a local image directory
    #[clap(long = "item", short = 'i', num_args = 2, value_names = ["DATASET_NAME", "IMAGE_DIR"], action = ArgAction::Append)]
    pub items: Vec<String>,

    /// New dataset from a local STAC collection document, fetched from --remote-catalog-url
    #[clap(long = "collection", num_args = 2, value_names = ["DATASET_NAME", "COLLECTION_JSON"], action = ArgAction::Append)]
    pub collections: Vec<String>,

    /// Resume uploading a local image directory into an existing dataset
    #[clap(long = "existing-item", short = 'e', num_args = 2, value_names = ["DATASET_ID", "IMAGE_DIR"], action = ArgAction::Append)]
    pub existing_items: Vec<String>,

    /// Remote URL of the catalog root the collections belong to
    #[clap(long)]
    pub remote_catalog_url: Option<String>,

    /// Create new datasets as private
    #[clap(long, short = 'p')]
    pub private: bool,

    /// Mark each dataset as upload-completed afterwards
    #[clap(long, short = 'c')]
    pub complete: bool,

    /// JSON file with metadata per dataset name
    #[clap(long, short = 'm')]
    pub metadata: Option<PathBuf>,

    /// Write one CSV report per dataset into this folder (current folder if no value)
    #[clap(long, short = 'o', num_args = 0..=1, default_missing_value = ".")]
    pub output_folder: Option<PathBuf>,

    #[clap(long, short = 'u', default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API token; falls back to the GEONADIR_TOKEN environment variable
    #[clap(long, short = 't')]
    pub token: Option<String>,

    /// YAML file with engine settings. Set `name_translation: verbatim` when
    /// resuming a dataset whose files were uploaded under their raw names
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Resolve and log the plan without any network calls
    #[clap(long)]
    pub dry_run: bool,
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::UploadDataset(args) => upload_dataset(args).await,
        Commands::SearchDataset {
            search_str,
            base_url,
        } => {
            let client = GeonadirClient::new(&base_url)?;
            let result = client.search_datasets(&search_str).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::GetDatasetInfo {
            project_id,
            base_url,
        } => {
            let client = GeonadirClient::new(&base_url)?;
            let result = client.dataset_info(project_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn upload_dataset(args: UploadArgs) -> Result<()> {
    let settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => EngineSettings::default(),
    };
    let metadata = match &args.metadata {
        Some(path) => load_metadata(path)?,
        None => MetadataCatalog::new(),
    };
    let specs = build_specs(&args, &metadata)?;
    if specs.is_empty() {
        bail!("nothing to upload: pass at least one --item, --collection or --existing-item");
    }
    let sink = args.output_folder.as_ref().map(CsvReportSink::new);

    if args.dry_run {
        log_plan(&specs, &settings, sink.as_ref());
        return Ok(());
    }

    let auth = resolve_token(args.token.as_deref()).ok_or_else(|| {
        anyhow!("no API token: pass --token or set {TOKEN_ENV_VAR}")
    })?;
    if let Some(dir) = &args.output_folder {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output folder {}", dir.display()))?;
    }

    let client = GeonadirClient::new(&args.base_url)?;
    let ctx = UploadContext {
        api: &client,
        fetcher: &client,
        auth,
        settings,
    };
    let report = run_batch(&ctx, &specs, sink.as_ref().map(|s| s as &dyn ReportSink)).await;

    for outcome in report.succeeded() {
        tracing::info!(
            command = "upload-dataset",
            dataset = %outcome.dataset_name,
            dataset_id = outcome.dataset_id,
            uploaded = outcome.uploaded(),
            failed = outcome.failed_transfers(),
            skipped_existing = outcome.skipped_existing.len(),
            "Dataset report"
        );
    }
    match report.failed_count() {
        0 => Ok(()),
        failed => Err(anyhow!(
            "{failed} of {} datasets failed",
            report.datasets.len()
        )),
    }
}

/// Turn the repeated pair arguments into dataset specs, in argument order.
pub fn build_specs(args: &UploadArgs, metadata: &MetadataCatalog) -> Result<Vec<DatasetSpec>> {
    let mut specs = Vec::new();

    for pair in args.items.chunks(2) {
        let [name, dir] = pair else {
            bail!("--item takes a dataset name and an image directory");
        };
        let name = sanitize_dataset_name(name);
        specs.push(DatasetSpec {
            metadata: metadata.get(&name).cloned(),
            name,
            source: DatasetSource::LocalDirectory(LocalDirectorySource {
                path: PathBuf::from(dir),
            }),
            private: args.private,
            existing_dataset_id: None,
            trigger_completion: args.complete,
        });
    }

    for pair in args.collections.chunks(2) {
        let [name, collection] = pair else {
            bail!("--collection takes a dataset name and a collection document");
        };
        let remote_root = args
            .remote_catalog_url
            .clone()
            .ok_or_else(|| anyhow!("--collection requires --remote-catalog-url"))?;
        let name = sanitize_dataset_name(name);
        specs.push(DatasetSpec {
            metadata: metadata.get(&name).cloned(),
            name,
            source: DatasetSource::RemoteCatalog(RemoteCatalogSource {
                collection_path: PathBuf::from(collection),
                remote_root,
            }),
            private: args.private,
            existing_dataset_id: None,
            trigger_completion: args.complete,
        });
    }

    for pair in args.existing_items.chunks(2) {
        let [id, dir] = pair else {
            bail!("--existing-item takes a dataset id and an image directory");
        };
        let dataset_id: DatasetId = id
            .parse()
            .with_context(|| format!("invalid dataset id '{id}'"))?;
        specs.push(DatasetSpec {
            name: dataset_id.to_string(),
            source: DatasetSource::LocalDirectory(LocalDirectorySource {
                path: PathBuf::from(dir),
            }),
            private: args.private,
            metadata: None,
            existing_dataset_id: Some(dataset_id),
            trigger_completion: args.complete,
        });
    }

    Ok(specs)
}

fn log_plan(specs: &[DatasetSpec], settings: &EngineSettings, sink: Option<&CsvReportSink>) {
    tracing::info!(
        datasets = specs.len(),
        workers = worker_count(specs.len(), settings.max_concurrent_datasets),
        "[PLAN] Dry run, no requests will be sent"
    );
    for spec in specs {
        let report = sink
            .map(|s| s.path_for(&spec.name).display().to_string())
            .unwrap_or_else(|| "none".to_string());
        tracing::info!(
            dataset = %spec.name,
            source = %spec.source,
            existing_dataset_id = ?spec.existing_dataset_id,
            private = spec.private,
            metadata = spec.metadata.is_some(),
            complete = spec.trigger_completion,
            report = %report,
            "[PLAN] Dataset"
        );
    }
}
