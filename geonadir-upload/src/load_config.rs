//! Loading of everything the CLI reads from disk or the environment before a
//! batch starts: engine settings (YAML), the metadata catalog (JSON) and the
//! API token. Dataset names given on the command line are sanitised here too.
//!
//! Every input is validated once, up front. A bad file fails the command
//! before any network call is made.

use anyhow::{anyhow, Context, Result};
use geonadir_upload_core::config::EngineSettings;
use geonadir_upload_core::contract::{AuthToken, DatasetMetadata};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Environment variable consulted when `--token` is not given.
pub const TOKEN_ENV_VAR: &str = "GEONADIR_TOKEN";

/// Name used when sanitising leaves nothing behind.
pub const FALLBACK_DATASET_NAME: &str = "untitled";

/// Per-dataset metadata keyed by sanitised dataset name.
pub type MetadataCatalog = BTreeMap<String, DatasetMetadata>;

/// Read engine settings from a YAML file. An empty file yields the defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<EngineSettings> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading engine settings from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read settings file");
            return Err(anyhow!("Failed to read settings file {:?}: {}", path_ref, e));
        }
    };
    if content.trim().is_empty() {
        return Ok(EngineSettings::default());
    }

    let settings: EngineSettings = match serde_yaml::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse settings YAML");
            return Err(anyhow!("Failed to parse settings YAML: {e}"));
        }
    };
    if settings.max_concurrent_datasets == 0 {
        return Err(anyhow!("max_concurrent_datasets must be at least 1"));
    }
    settings.trace_loaded();
    Ok(settings)
}

/// Read the metadata file: a JSON object mapping dataset name to an object of
/// metadata fields.
pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<MetadataCatalog> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read metadata file {}", path_ref.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse metadata JSON in {}", path_ref.display()))?;
    let catalog = parse_metadata(value)?;
    info!(metadata_path = ?path_ref, datasets = catalog.len(), "Loaded dataset metadata");
    Ok(catalog)
}

pub fn parse_metadata(value: Value) -> Result<MetadataCatalog> {
    let Value::Object(entries) = value else {
        return Err(anyhow!(
            "metadata file must contain a JSON object keyed by dataset name"
        ));
    };
    entries
        .into_iter()
        .map(|(name, fields)| {
            let metadata = DatasetMetadata::from_value(fields)
                .with_context(|| format!("invalid metadata for dataset '{name}'"))?;
            Ok((name, metadata))
        })
        .collect()
}

/// `--token` wins over the environment. Blank values count as missing.
pub fn resolve_token(flag: Option<&str>) -> Option<AuthToken> {
    flag.map(str::to_string)
        .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
        .filter(|t| !t.trim().is_empty())
        .map(AuthToken::new)
}

/// Spaces become underscores; anything outside `[A-Za-z0-9-_]` is dropped.
pub fn sanitize_dataset_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if sanitized.is_empty() {
        warn!(raw = %raw, fallback = FALLBACK_DATASET_NAME, "Dataset name is empty after sanitising");
        return FALLBACK_DATASET_NAME.to_string();
    }
    sanitized
}
