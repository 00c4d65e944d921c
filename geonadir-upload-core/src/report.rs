//! Upload results: per-file records, per-job outcomes, the batch report,
//! and the CSV sink that persists them.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::contract::{DatasetId, ReportSink};
use crate::error::UploadError;

/// CSV header, in field order of [`UploadRecord`].
pub const REPORT_COLUMNS: [&str; 6] = [
    "Project ID",
    "Dataset Name",
    "Image Name",
    "Response Code",
    "Upload Time (ms)",
    "Image Size",
];

/// One attempted transfer. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    pub image_name: String,
    /// `None` when the request could not be completed at all.
    pub status_code: Option<u16>,
    /// Wall time of the upload request alone.
    pub elapsed_millis: u64,
    pub byte_size: u64,
}

impl UploadRecord {
    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|s| (200..300).contains(&s))
    }
}

/// A file that was never attempted because it could not be staged or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableFile {
    pub display_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    NotRequested,
    Triggered,
    Failed(String),
}

/// Result of one successful (possibly partially failing) upload job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    /// In transfer order.
    pub records: Vec<UploadRecord>,
    /// Display names already present remotely.
    pub skipped_existing: Vec<String>,
    pub unreadable: Vec<UnreadableFile>,
    pub index_complete: bool,
    pub completion: CompletionStatus,
}

impl JobOutcome {
    pub fn uploaded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_transfers(&self) -> usize {
        self.records.len() - self.uploaded()
    }

    pub fn trace_summary(&self) {
        info!(
            dataset = %self.dataset_name,
            dataset_id = self.dataset_id,
            uploaded = self.uploaded(),
            failed = self.failed_transfers(),
            skipped_existing = self.skipped_existing.len(),
            unreadable = self.unreadable.len(),
            completion = ?self.completion,
            "[UPLOAD] Dataset finished"
        );
    }
}

/// One dataset's entry in the batch report.
#[derive(Debug)]
pub struct DatasetReport {
    pub dataset_name: String,
    pub result: Result<JobOutcome, UploadError>,
}

/// Aggregate over all requested datasets, in completion order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub datasets: Vec<DatasetReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &JobOutcome> {
        self.datasets.iter().filter_map(|d| d.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &UploadError)> {
        self.datasets
            .iter()
            .filter_map(|d| d.result.as_ref().err().map(|e| (d.dataset_name.as_str(), e)))
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn total_records(&self) -> usize {
        self.succeeded().map(|o| o.records.len()).sum()
    }
}

/// Writes `<output_dir>/<dataset_name>.csv`.
#[derive(Debug, Clone)]
pub struct CsvReportSink {
    output_dir: PathBuf,
}

impl CsvReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, dataset_name: &str) -> PathBuf {
        self.output_dir.join(format!("{dataset_name}.csv"))
    }
}

impl ReportSink for CsvReportSink {
    fn write(&self, dataset_name: &str, records: &[UploadRecord]) -> Result<PathBuf, UploadError> {
        let path = self.path_for(dataset_name);
        write_csv(&path, records)?;
        info!(path = %path.display(), rows = records.len(), "Wrote upload report");
        Ok(path)
    }
}

fn write_csv(path: &Path, records: &[UploadRecord]) -> Result<(), UploadError> {
    let csv_err = |e: csv::Error| match e.into_kind() {
        csv::ErrorKind::Io(io) => UploadError::io(path, io),
        other => UploadError::Validation(format!("cannot encode report row: {other:?}")),
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;
    writer.write_record(REPORT_COLUMNS).map_err(csv_err)?;
    for record in records {
        writer.serialize(record).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| UploadError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(name: &str, status: Option<u16>) -> UploadRecord {
        UploadRecord {
            dataset_id: 8769,
            dataset_name: "reef".into(),
            image_name: name.into(),
            status_code: status,
            elapsed_millis: 1500,
            byte_size: 2048,
        }
    }

    #[test]
    fn csv_has_one_row_per_record() {
        let dir = tempdir().unwrap();
        let sink = CsvReportSink::new(dir.path());
        let path = sink
            .write(
                "reef",
                &[record("a.jpg", Some(201)), record("b.jpg", Some(500)), record("c.jpg", None)],
            )
            .unwrap();
        assert_eq!(path, dir.path().join("reef.csv"));

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Project ID,Dataset Name,Image Name,Response Code,Upload Time (ms),Image Size",
                "8769,reef,a.jpg,201,1500,2048",
                "8769,reef,b.jpg,500,1500,2048",
                "8769,reef,c.jpg,,1500,2048",
            ]
        );
    }

    #[test]
    fn empty_report_still_has_header() {
        let dir = tempdir().unwrap();
        let path = CsvReportSink::new(dir.path()).write("empty", &[]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn success_means_2xx() {
        assert!(record("a", Some(200)).is_success());
        assert!(!record("a", Some(401)).is_success());
        assert!(!record("a", None).is_success());
    }
}
