use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::naming::{NameTranslation, RemoteNamePolicy};

/// Upper bound on datasets uploaded at the same time.
pub const DEFAULT_MAX_CONCURRENT_DATASETS: usize = 5;

/// What a job does when the remote listing walk ended early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteIndexPolicy {
    /// Skip filtering and upload everything (risks duplicates, never skips a real upload).
    #[default]
    UploadAll,
    /// Fail the dataset's job.
    FailJob,
}

/// Engine behaviour knobs. Every field has a default, so an empty document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub max_concurrent_datasets: usize,
    pub name_translation: NameTranslation,
    pub strip_storage_suffix: bool,
    pub incomplete_index: IncompleteIndexPolicy,
    /// Parent directory for staged catalog assets; system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_datasets: DEFAULT_MAX_CONCURRENT_DATASETS,
            name_translation: NameTranslation::default(),
            strip_storage_suffix: false,
            incomplete_index: IncompleteIndexPolicy::default(),
            staging_dir: None,
        }
    }
}

impl EngineSettings {
    pub fn name_policy(&self) -> RemoteNamePolicy {
        RemoteNamePolicy::new(self.name_translation, self.strip_storage_suffix)
    }

    pub fn trace_loaded(&self) {
        info!(
            max_concurrent_datasets = self.max_concurrent_datasets,
            name_translation = ?self.name_translation,
            incomplete_index = ?self.incomplete_index,
            "Loaded engine settings"
        );
        debug!(?self, "Engine settings loaded (full debug)");
    }
}
