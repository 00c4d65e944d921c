//! Upload job: everything that happens to one dataset.
//!
//! Enumerating -> Reconciling | CreatingDataset -> Filtering -> Transferring
//! -> Finalizing -> Completed | Failed
//!
//! Transfers inside one job are strictly sequential so the record order is
//! reproducible. A file that cannot be staged or read is skipped and logged;
//! a non-2xx upload is recorded, never raised.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EngineSettings, IncompleteIndexPolicy};
use crate::contract::{AssetFetcher, AuthToken, DatasetApi, DatasetId, DatasetMetadata, NewDataset};
use crate::error::UploadError;
use crate::naming::RemoteNamePolicy;
use crate::remote_index::{fetch_existing_names, RemoteFileIndex};
use crate::report::{CompletionStatus, JobOutcome, UnreadableFile, UploadRecord};
use crate::source::{enumerate_blocking, DatasetSource, FileEntry, ResourceRef};

/// One requested dataset. Immutable input to exactly one job.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Already sanitised.
    pub name: String,
    pub source: DatasetSource,
    pub private: bool,
    pub metadata: Option<DatasetMetadata>,
    /// Resume into this dataset instead of creating a new one.
    pub existing_dataset_id: Option<DatasetId>,
    pub trigger_completion: bool,
}

/// Collaborators and settings shared by every job of a batch.
pub struct UploadContext<'a, A: ?Sized, F: ?Sized> {
    pub api: &'a A,
    pub fetcher: &'a F,
    pub auth: AuthToken,
    pub settings: EngineSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Enumerating,
    Reconciling,
    CreatingDataset,
    Filtering,
    Transferring,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Enumerating => "enumerating",
            JobPhase::Reconciling => "reconciling",
            JobPhase::CreatingDataset => "creating_dataset",
            JobPhase::Filtering => "filtering",
            JobPhase::Transferring => "transferring",
            JobPhase::Finalizing => "finalizing",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(dataset: &str, phase: JobPhase) {
    info!(dataset = %dataset, phase = %phase, "[UPLOAD] Job phase");
}

/// Run the whole job for `spec`. Errors fail this dataset only.
pub async fn run_upload_job<A, F>(
    ctx: &UploadContext<'_, A, F>,
    spec: &DatasetSpec,
) -> Result<JobOutcome, UploadError>
where
    A: DatasetApi + ?Sized,
    F: AssetFetcher + ?Sized,
{
    match run_phases(ctx, spec).await {
        Ok(outcome) => {
            enter(&spec.name, JobPhase::Completed);
            outcome.trace_summary();
            Ok(outcome)
        }
        Err(e) => {
            enter(&spec.name, JobPhase::Failed);
            if e.is_auth() {
                error!(dataset = %spec.name, error = %e, "[UPLOAD][ERROR] Authentication failed");
            } else {
                error!(dataset = %spec.name, error = %e, "[UPLOAD][ERROR] Dataset job failed");
            }
            Err(e)
        }
    }
}

async fn run_phases<A, F>(
    ctx: &UploadContext<'_, A, F>,
    spec: &DatasetSpec,
) -> Result<JobOutcome, UploadError>
where
    A: DatasetApi + ?Sized,
    F: AssetFetcher + ?Sized,
{
    let policy = ctx.settings.name_policy();

    enter(&spec.name, JobPhase::Enumerating);
    info!(dataset = %spec.name, source = %spec.source, "[UPLOAD] Enumerating source");
    let entries = enumerate_blocking(spec.source.clone()).await?;

    let (dataset_id, index) = match spec.existing_dataset_id {
        Some(dataset_id) => {
            enter(&spec.name, JobPhase::Reconciling);
            let index = fetch_existing_names(ctx.api, &ctx.auth, dataset_id, &policy).await?;
            (dataset_id, index)
        }
        None => {
            enter(&spec.name, JobPhase::CreatingDataset);
            let request = NewDataset {
                name: spec.name.clone(),
                private: spec.private,
                metadata: spec.metadata.clone(),
            };
            let dataset_id = ctx.api.create_dataset(&ctx.auth, &request).await?;
            info!(dataset = %spec.name, dataset_id, "[UPLOAD] Created dataset");
            (dataset_id, RemoteFileIndex::empty())
        }
    };

    enter(&spec.name, JobPhase::Filtering);
    let (pending, skipped_existing) =
        filter_pending(entries, &index, &policy, ctx.settings.incomplete_index)?;
    info!(
        dataset = %spec.name,
        pending = pending.len(),
        skipped_existing = skipped_existing.len(),
        "[UPLOAD] Filtered against remote index"
    );

    enter(&spec.name, JobPhase::Transferring);
    let staging = if pending.iter().any(|e| matches!(e.source, ResourceRef::Remote(_))) {
        Some(create_staging_dir(ctx.settings.staging_dir.as_deref())?)
    } else {
        None
    };

    let mut records = Vec::with_capacity(pending.len());
    let mut unreadable = Vec::new();
    for entry in &pending {
        let (content, staged) =
            match load_content(ctx.fetcher, entry, staging.as_ref().map(TempDir::path)).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    error!(
                        dataset = %spec.name,
                        file = %entry.display_name,
                        error = %e,
                        "[UPLOAD][ERROR] Could not read file, skipping it"
                    );
                    unreadable.push(UnreadableFile {
                        display_name: entry.display_name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

        let byte_size = content.len() as u64;
        let remote_name = policy.to_remote_name(&entry.display_name);
        let started = Instant::now();
        let result = ctx
            .api
            .upload_image(&ctx.auth, dataset_id, &remote_name, content)
            .await;
        let elapsed_millis = started.elapsed().as_millis() as u64;

        if let Some(path) = staged {
            remove_staged(&path).await;
        }

        let status_code = match result {
            Ok(status) if (200..300).contains(&status) => {
                info!(dataset = %spec.name, file = %entry.display_name, status, elapsed_ms = elapsed_millis, bytes = byte_size, "[UPLOAD] File uploaded");
                Some(status)
            }
            Ok(status) => {
                warn!(dataset = %spec.name, file = %entry.display_name, status, elapsed_ms = elapsed_millis, "[UPLOAD] Upload rejected");
                Some(status)
            }
            Err(e) => {
                warn!(dataset = %spec.name, file = %entry.display_name, error = %e, "[UPLOAD] Upload request failed");
                None
            }
        };
        records.push(UploadRecord {
            dataset_id,
            dataset_name: spec.name.clone(),
            image_name: entry.display_name.clone(),
            status_code,
            elapsed_millis,
            byte_size,
        });
    }
    drop(staging);

    enter(&spec.name, JobPhase::Finalizing);
    let completion = if spec.trigger_completion {
        match ctx.api.trigger_completion(&ctx.auth, dataset_id).await {
            Ok(()) => {
                info!(dataset = %spec.name, dataset_id, "[UPLOAD] Completion signal sent");
                CompletionStatus::Triggered
            }
            Err(e) => {
                error!(dataset = %spec.name, dataset_id, error = %e, "[UPLOAD][ERROR] Completion signal failed");
                CompletionStatus::Failed(e.to_string())
            }
        }
    } else {
        CompletionStatus::NotRequested
    };

    Ok(JobOutcome {
        dataset_id,
        dataset_name: spec.name.clone(),
        records,
        skipped_existing,
        unreadable,
        index_complete: index.is_complete(),
        completion,
    })
}

/// Split `entries` into files still to upload and display names already
/// present remotely. An incomplete index either disables filtering or fails,
/// depending on `on_incomplete`.
pub fn filter_pending(
    entries: Vec<FileEntry>,
    index: &RemoteFileIndex,
    policy: &RemoteNamePolicy,
    on_incomplete: IncompleteIndexPolicy,
) -> Result<(Vec<FileEntry>, Vec<String>), UploadError> {
    if !index.is_complete() {
        return match on_incomplete {
            IncompleteIndexPolicy::UploadAll => {
                warn!(
                    candidates = entries.len(),
                    "[UPLOAD] Remote index incomplete, uploading every file without filtering"
                );
                Ok((entries, Vec::new()))
            }
            IncompleteIndexPolicy::FailJob => Err(UploadError::Network(
                "remote file listing could not be completed".into(),
            )),
        };
    }

    let mut pending = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();
    for entry in entries {
        if index.contains(&policy.to_remote_name(&entry.display_name)) {
            info!(file = %entry.display_name, "[UPLOAD] Already present remotely, skipping");
            skipped.push(entry.display_name);
        } else {
            pending.push(entry);
        }
    }
    Ok((pending, skipped))
}

fn create_staging_dir(parent: Option<&Path>) -> Result<TempDir, UploadError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("geonadir-staging-");
    match parent {
        Some(dir) => builder.tempdir_in(dir).map_err(|e| UploadError::io(dir, e)),
        None => builder
            .tempdir()
            .map_err(|e| UploadError::io(std::env::temp_dir(), e)),
    }
}

/// Bytes to upload plus the staged path to clean up afterwards, if any.
async fn load_content<F>(
    fetcher: &F,
    entry: &FileEntry,
    staging: Option<&Path>,
) -> Result<(Vec<u8>, Option<PathBuf>), UploadError>
where
    F: AssetFetcher + ?Sized,
{
    match &entry.source {
        ResourceRef::Local(path) => {
            let content = tokio::fs::read(path)
                .await
                .map_err(|e| UploadError::io(path, e))?;
            Ok((content, None))
        }
        ResourceRef::Remote(url) => {
            let staging = staging
                .ok_or_else(|| UploadError::Task("no staging directory for remote asset".into()))?;
            // Unique per file so concurrent jobs sharing a parent never clash.
            let dest = staging.join(format!("{}-{}", Uuid::new_v4().simple(), entry.display_name));
            if let Err(e) = fetcher.fetch_to(url, &dest).await {
                remove_staged(&dest).await;
                return Err(e);
            }
            debug!(url = %url, path = %dest.display(), "[UPLOAD] Staged remote asset");
            match tokio::fs::read(&dest).await {
                Ok(content) => Ok((content, Some(dest))),
                Err(e) => {
                    remove_staged(&dest).await;
                    Err(UploadError::io(&dest, e))
                }
            }
        }
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
    }
}
