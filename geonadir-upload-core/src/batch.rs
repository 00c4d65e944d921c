//! Batch coordinator: runs one upload job per dataset on a bounded pool and
//! aggregates their results.
//!
//! # Responsibilities
//! - At most `min(datasets, max_concurrent_datasets)` jobs in flight
//! - Results collected in completion order
//! - A failed job is recorded against its dataset; the others keep going
//! - Reports are handed to the sink only once every job has finished
//!
//! # Navigation
//! - Entrypoint: [`run_batch`]
//! - Output: [`BatchReport`]

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::contract::{AssetFetcher, DatasetApi, ReportSink};
use crate::job::{run_upload_job, DatasetSpec, UploadContext};
use crate::report::{BatchReport, DatasetReport};

/// Number of jobs allowed in flight for `dataset_count` datasets.
pub fn worker_count(dataset_count: usize, max_concurrent: usize) -> usize {
    dataset_count.min(max_concurrent).max(1)
}

/// Upload every dataset in `specs`. Always attempts all of them.
pub async fn run_batch<A, F>(
    ctx: &UploadContext<'_, A, F>,
    specs: &[DatasetSpec],
    sink: Option<&dyn ReportSink>,
) -> BatchReport
where
    A: DatasetApi + ?Sized,
    F: AssetFetcher + ?Sized,
{
    let workers = worker_count(specs.len(), ctx.settings.max_concurrent_datasets);
    info!(datasets = specs.len(), workers, "[BATCH] Starting batch upload");

    let datasets: Vec<DatasetReport> = stream::iter(specs)
        .map(|spec| async move {
            let result = run_upload_job(ctx, spec).await;
            DatasetReport {
                dataset_name: spec.name.clone(),
                result,
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let report = BatchReport { datasets };

    match sink {
        Some(sink) => {
            for outcome in report.succeeded() {
                if let Err(e) = sink.write(&outcome.dataset_name, &outcome.records) {
                    error!(dataset = %outcome.dataset_name, error = %e, "[BATCH][ERROR] Failed to write report");
                }
            }
        }
        None => info!("[BATCH] No report output requested"),
    }

    for (name, e) in report.failed() {
        error!(dataset = %name, error = %e, "[BATCH] Dataset failed");
    }
    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed_count(),
        records = report.total_records(),
        "[BATCH] Batch finished"
    );
    report
}
