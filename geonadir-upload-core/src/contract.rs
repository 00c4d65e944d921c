#![allow(unused)]

//! # contract: the collaborators the upload engine drives
//!
//! The engine never talks HTTP or writes report files itself. It calls the
//! traits below, which the CLI crate implements against the Geonadir API and
//! which tests replace with `mockall` mocks.
//!
//! ## Traits
//! - [`DatasetApi`]: dataset creation, single-file upload, listing pages, completion trigger.
//! - [`AssetFetcher`]: stages a remote catalog asset to a local file.
//! - [`ReportSink`]: persists one dataset's upload records.
//!
//! ## Authentication
//! Credentials travel as an explicit [`AuthToken`] argument on every call
//! rather than living in the client, so concurrent jobs may use different tokens.
//!
//! ## Mocking & Testing
//! Mocks (`MockDatasetApi`, `MockAssetFetcher`, `MockReportSink`) are generated
//! for unit tests and exported under the `test-export-mocks` feature.

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::UploadError;
use crate::report::UploadRecord;

/// Server-side dataset (project) identifier.
pub type DatasetId = u64;

/// Fields the create call sets itself; metadata may not override them.
pub const RESERVED_METADATA_KEYS: &[&str] = &["dataset_name", "is_private", "is_published"];

/// API token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        AuthToken(token.into())
    }

    /// Value for the `Authorization` header (`Token <key>`).
    pub fn header_value(&self) -> String {
        let raw = self.0.trim();
        if raw.starts_with("Token ") {
            raw.to_string()
        } else {
            format!("Token {raw}")
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Validated metadata for a new dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetMetadata {
    fields: BTreeMap<String, Value>,
}

impl DatasetMetadata {
    /// Accepts a JSON object whose keys are not reserved by the create call.
    pub fn from_value(value: Value) -> Result<Self, UploadError> {
        let Value::Object(map) = value else {
            return Err(UploadError::Validation(
                "dataset metadata must be a JSON object".into(),
            ));
        };
        if let Some(key) = map
            .keys()
            .find(|k| RESERVED_METADATA_KEYS.contains(&k.as_str()))
        {
            return Err(UploadError::Validation(format!(
                "metadata key '{key}' is set by the uploader and cannot be overridden"
            )));
        }
        Ok(Self {
            fields: map.into_iter().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Multipart form fields: strings as-is, everything else JSON-encoded.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }
}

/// Everything the create call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub name: String,
    pub private: bool,
    pub metadata: Option<DatasetMetadata>,
}

/// One page of the per-dataset file listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Raw stored-name values, before normalisation.
    pub stored_names: Vec<String>,
    pub next_page_url: Option<String>,
}

impl ListingPage {
    /// Interpret a listing response body. Missing fields mean "nothing on this
    /// page" and are logged, never fatal.
    pub fn from_value(url: &str, value: &Value) -> Self {
        let stored_names = match value.get("results").and_then(Value::as_array) {
            Some(results) => results
                .iter()
                .filter_map(|r| match r.get("upload_files").and_then(Value::as_str) {
                    Some(name) => Some(name.to_string()),
                    None => {
                        warn!(url = %url, "[INDEX] Listing result without 'upload_files', ignoring it");
                        None
                    }
                })
                .collect(),
            None => {
                warn!(url = %url, "[INDEX] Listing page has no 'results' array, treating as empty");
                Vec::new()
            }
        };
        let next_page_url = value
            .get("next")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_string);
        ListingPage {
            stored_names,
            next_page_url,
        }
    }
}

/// Dataset-level operations on the remote service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DatasetApi: Send + Sync {
    /// Create a dataset and return its id.
    ///
    /// Fails with `Auth` on a rejected token, `Validation` on malformed metadata,
    /// `Network`/`Http` otherwise.
    async fn create_dataset(
        &self,
        auth: &AuthToken,
        dataset: &NewDataset,
    ) -> Result<DatasetId, UploadError>;

    /// Upload one file. Any HTTP status is returned as `Ok`; `Err` only when
    /// the request could not be completed at all.
    async fn upload_image(
        &self,
        auth: &AuthToken,
        dataset_id: DatasetId,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<u16, UploadError>;

    /// URL of the first listing page for a dataset.
    fn first_listing_url(&self, dataset_id: DatasetId) -> String;

    /// Fetch and interpret one listing page.
    async fn list_page(&self, auth: &AuthToken, url: &str) -> Result<ListingPage, UploadError>;

    /// Signal that all files of the dataset have been uploaded.
    async fn trigger_completion(
        &self,
        auth: &AuthToken,
        dataset_id: DatasetId,
    ) -> Result<(), UploadError>;
}

/// Stages remote catalog assets locally.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    /// Non-2xx responses are errors.
    async fn fetch_to(&self, url: &Url, dest: &Path) -> Result<u64, UploadError>;
}

/// Persists the records of one dataset, e.g. as a CSV file.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ReportSink: Send + Sync {
    /// Write the records and return where they went.
    fn write(&self, dataset_name: &str, records: &[UploadRecord]) -> Result<PathBuf, UploadError>;
}
