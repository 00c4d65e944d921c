#![doc = "Geonadir REST client: implements the core collaborator traits over reqwest."]
//
//! # Geonadir client (CLI <-> Core)
//!
//! [`GeonadirClient`] is the production implementation of
//! [`DatasetApi`] and [`AssetFetcher`]. The engine in `geonadir-upload-core`
//! only ever sees the traits; this module owns URLs, multipart layout,
//! timeouts and the mapping of HTTP outcomes onto [`UploadError`].
//!
//! - 401 on any authenticated call becomes `UploadError::Auth`
//! - 400 on dataset creation becomes `UploadError::Validation`
//! - other non-2xx become `UploadError::Http`, except on image upload where
//!   the status is returned for the report
//! - transport failures become `UploadError::Network`

use async_trait::async_trait;
use geonadir_upload_core::contract::{
    AssetFetcher, AuthToken, DatasetApi, DatasetId, ListingPage, NewDataset,
};
use geonadir_upload_core::UploadError;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.geonadir.com";

const CREATE_TIMEOUT: Duration = Duration::from_secs(120);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);
const LISTING_TIMEOUT: Duration = Duration::from_secs(60);
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(180);
const FETCH_TIMEOUT: Duration = Duration::from_secs(180);
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GeonadirClient {
    http: Client,
    base_url: String,
}

impl GeonadirClient {
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let http = Client::builder()
            .user_agent(concat!("geonadir-upload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Network(format!("cannot build HTTP client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, "Initialized Geonadir client");
        Ok(GeonadirClient { http, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// `GET /api/search_datasets?search=...`, returned as raw JSON.
    pub async fn search_datasets(&self, search: &str) -> Result<Value, UploadError> {
        tracing::info!(search, "Searching datasets");
        let request = self
            .http
            .get(self.endpoint("search_datasets"))
            .query(&[("search", search)])
            .timeout(QUERY_TIMEOUT);
        let response = send(request, "search_datasets").await?;
        json_body(check_status(response, "search_datasets")?, "search_datasets").await
    }

    /// `GET /api/metadata/?project_id=...`, returned as raw JSON.
    pub async fn dataset_info(&self, project_id: DatasetId) -> Result<Value, UploadError> {
        tracing::info!(project_id, "Fetching dataset metadata");
        let request = self
            .http
            .get(self.endpoint("metadata/"))
            .query(&[("project_id", project_id)])
            .timeout(QUERY_TIMEOUT);
        let response = send(request, "metadata").await?;
        json_body(check_status(response, "metadata")?, "metadata").await
    }
}

async fn send(request: RequestBuilder, context: &str) -> Result<Response, UploadError> {
    request.send().await.map_err(|e| {
        tracing::warn!(error = %e, context, "Request could not be completed");
        UploadError::Network(format!("{context}: {e}"))
    })
}

fn check_status(response: Response, context: &str) -> Result<Response, UploadError> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(UploadError::auth(context)),
        status if status.is_success() => Ok(response),
        status => Err(UploadError::http(status.as_u16(), context)),
    }
}

async fn json_body(response: Response, context: &str) -> Result<Value, UploadError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| UploadError::Network(format!("{context}: unreadable response body: {e}")))
}

#[async_trait]
impl DatasetApi for GeonadirClient {
    async fn create_dataset(
        &self,
        auth: &AuthToken,
        dataset: &NewDataset,
    ) -> Result<DatasetId, UploadError> {
        tracing::info!(
            dataset = %dataset.name,
            private = dataset.private,
            with_metadata = dataset.metadata.is_some(),
            "Creating dataset"
        );
        let mut form = Form::new()
            .text("dataset_name", dataset.name.clone())
            .text("is_private", dataset.private.to_string())
            .text("is_published", "true");
        if let Some(metadata) = &dataset.metadata {
            for (key, value) in metadata.form_fields() {
                form = form.text(key, value);
            }
        }

        let request = self
            .http
            .post(self.endpoint("dataset/"))
            .header(AUTHORIZATION, auth.header_value())
            .multipart(form)
            .timeout(CREATE_TIMEOUT);
        let response = send(request, "dataset creation").await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!(dataset = %dataset.name, detail = %detail, "Dataset creation rejected");
            return Err(UploadError::Validation(format!(
                "dataset '{}' rejected by server: {detail}",
                dataset.name
            )));
        }
        let body = json_body(check_status(response, "dataset creation")?, "dataset creation").await?;
        body.get("id").and_then(Value::as_u64).ok_or_else(|| {
            UploadError::Validation(format!("dataset creation response has no numeric id: {body}"))
        })
    }

    async fn upload_image(
        &self,
        auth: &AuthToken,
        dataset_id: DatasetId,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<u16, UploadError> {
        let form = Form::new()
            .text("project_id", dataset_id.to_string())
            .part("upload_files", Part::bytes(content).file_name(file_name.to_string()));
        let request = self
            .http
            .post(self.endpoint("upload_image/"))
            .header(AUTHORIZATION, auth.header_value())
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT);
        let response = send(request, "image upload").await?;
        let status = response.status().as_u16();
        tracing::debug!(dataset_id, file_name, status, "Image upload answered");
        Ok(status)
    }

    fn first_listing_url(&self, dataset_id: DatasetId) -> String {
        format!(
            "{}?page=1&project_id={dataset_id}",
            self.endpoint("uploadfiles/")
        )
    }

    async fn list_page(&self, auth: &AuthToken, url: &str) -> Result<ListingPage, UploadError> {
        let request = self
            .http
            .get(url)
            .header(AUTHORIZATION, auth.header_value())
            .timeout(LISTING_TIMEOUT);
        let response = send(request, "file listing").await?;
        let body = json_body(check_status(response, "file listing")?, "file listing").await?;
        Ok(ListingPage::from_value(url, &body))
    }

    async fn trigger_completion(
        &self,
        auth: &AuthToken,
        dataset_id: DatasetId,
    ) -> Result<(), UploadError> {
        let form = Form::new()
            .text("dataset_id", dataset_id.to_string())
            .text("flag", "upload_completed");
        let request = self
            .http
            .post(self.endpoint("utility/dataset-actions/"))
            .header(AUTHORIZATION, auth.header_value())
            .multipart(form)
            .timeout(COMPLETION_TIMEOUT);
        let response = send(request, "completion trigger").await?;
        check_status(response, "completion trigger")?;
        tracing::info!(dataset_id, "Dataset marked as upload completed");
        Ok(())
    }
}

#[async_trait]
impl AssetFetcher for GeonadirClient {
    async fn fetch_to(&self, url: &Url, dest: &Path) -> Result<u64, UploadError> {
        let request = self.http.get(url.clone()).timeout(FETCH_TIMEOUT);
        let response = send(request, url.as_str()).await?;
        let response = check_status(response, url.as_str())?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UploadError::Network(format!("{url}: {e}")))?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| UploadError::io(dest, e))?;
        tracing::debug!(url = %url, path = %dest.display(), bytes = bytes.len(), "Fetched asset");
        Ok(bytes.len() as u64)
    }
}
