use geonadir_upload_core::config::{EngineSettings, IncompleteIndexPolicy};
use geonadir_upload_core::contract::{
    AuthToken, ListingPage, MockAssetFetcher, MockDatasetApi, NewDataset,
};
use geonadir_upload_core::job::{run_upload_job, DatasetSpec, UploadContext};
use geonadir_upload_core::report::CompletionStatus;
use geonadir_upload_core::source::{DatasetSource, LocalDirectorySource, RemoteCatalogSource};
use geonadir_upload_core::UploadError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn touch(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn local_spec(name: &str, dir: &Path, existing: Option<u64>) -> DatasetSpec {
    DatasetSpec {
        name: name.to_string(),
        source: DatasetSource::LocalDirectory(LocalDirectorySource {
            path: dir.to_path_buf(),
        }),
        private: false,
        metadata: None,
        existing_dataset_id: existing,
        trigger_completion: false,
    }
}

fn context<'a>(
    api: &'a MockDatasetApi,
    fetcher: &'a MockAssetFetcher,
    settings: EngineSettings,
) -> UploadContext<'a, MockDatasetApi, MockAssetFetcher> {
    UploadContext {
        api,
        fetcher,
        auth: AuthToken::new("secret"),
        settings,
    }
}

/// Records every uploaded file name, answering 201.
fn capture_uploads(api: &mut MockDatasetApi) -> Arc<Mutex<Vec<String>>> {
    let uploaded = Arc::new(Mutex::new(Vec::new()));
    let sink = uploaded.clone();
    api.expect_upload_image().returning(move |_, _, name, _| {
        sink.lock().unwrap().push(name.to_string());
        Ok(201)
    });
    uploaded
}

fn listing_with(names: &'static [&'static str], api: &mut MockDatasetApi) {
    api.expect_first_listing_url()
        .returning(|id| format!("https://api.test/api/uploadfiles/?page=1&project_id={id}"));
    api.expect_list_page().times(1).returning(move |_, _| {
        Ok(ListingPage {
            stored_names: names.iter().map(|n| format!("https://cdn.test/uploads/{n}")).collect(),
            next_page_url: None,
        })
    });
}

#[tokio::test]
async fn test_resume_skips_files_already_in_remote_index() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a.jpg", b"aaa");
    touch(dir.path(), "sub/a.jpg", b"sub-a");
    touch(dir.path(), "b.png", b"bb");

    let mut api = MockDatasetApi::new();
    listing_with(&["a.jpg"], &mut api);
    api.expect_create_dataset().never();
    let uploaded = capture_uploads(&mut api);
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let outcome = run_upload_job(&ctx, &local_spec("reef", dir.path(), Some(42)))
        .await
        .expect("job should succeed");

    assert_eq!(*uploaded.lock().unwrap(), vec!["b.png", "a_Copy_1.jpg"]);
    assert_eq!(outcome.skipped_existing, vec!["a.jpg"]);
    assert_eq!(outcome.dataset_id, 42);
    assert!(outcome.index_complete);
    let names: Vec<_> = outcome.records.iter().map(|r| r.image_name.as_str()).collect();
    assert_eq!(names, vec!["b.png", "a_Copy_1.jpg"]);
}

#[tokio::test]
async fn test_resume_compares_translated_names() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "my photo.jpg", b"x");
    touch(dir.path(), "other.jpg", b"y");

    let mut api = MockDatasetApi::new();
    listing_with(&["my-20-photo.jpg"], &mut api);
    let uploaded = capture_uploads(&mut api);
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let outcome = run_upload_job(&ctx, &local_spec("reef", dir.path(), Some(1)))
        .await
        .unwrap();
    assert_eq!(*uploaded.lock().unwrap(), vec!["other.jpg"]);
    assert_eq!(outcome.skipped_existing, vec!["my photo.jpg"]);
}

#[tokio::test]
async fn test_server_error_is_recorded_and_later_files_still_attempted() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "1.jpg", b"one");
    touch(dir.path(), "2.jpg", b"twotwo");
    touch(dir.path(), "3.jpg", b"threethreethree");

    let mut api = MockDatasetApi::new();
    api.expect_create_dataset()
        .withf(|auth, dataset: &NewDataset| {
            auth.header_value() == "Token secret" && dataset.name == "reef" && !dataset.private
        })
        .times(1)
        .returning(|_, _| Ok(99));
    api.expect_upload_image()
        .times(3)
        .returning(|_, dataset_id, name, _| {
            assert_eq!(dataset_id, 99);
            Ok(if name == "2.jpg" { 500 } else { 201 })
        });
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let outcome = run_upload_job(&ctx, &local_spec("reef", dir.path(), None))
        .await
        .unwrap();

    let rows: Vec<_> = outcome
        .records
        .iter()
        .map(|r| (r.image_name.as_str(), r.status_code, r.byte_size))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("1.jpg", Some(201), 3),
            ("2.jpg", Some(500), 6),
            ("3.jpg", Some(201), 15),
        ]
    );
    assert_eq!(outcome.uploaded(), 2);
    assert_eq!(outcome.failed_transfers(), 1);
    assert!(outcome.records.iter().all(|r| r.dataset_name == "reef" && r.dataset_id == 99));
    assert_eq!(outcome.completion, CompletionStatus::NotRequested);
}

#[tokio::test]
async fn test_network_failure_on_upload_is_recorded_without_status() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "1.jpg", b"one");
    touch(dir.path(), "2.jpg", b"two");

    let mut api = MockDatasetApi::new();
    api.expect_create_dataset().returning(|_, _| Ok(5));
    api.expect_upload_image().times(2).returning(|_, _, name, _| {
        if name == "1.jpg" {
            Err(UploadError::Network("timed out".into()))
        } else {
            Ok(200)
        }
    });
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let outcome = run_upload_job(&ctx, &local_spec("reef", dir.path(), None))
        .await
        .unwrap();
    let statuses: Vec<_> = outcome.records.iter().map(|r| r.status_code).collect();
    assert_eq!(statuses, vec![None, Some(200)]);
}

#[tokio::test]
async fn test_incomplete_index_uploads_everything_by_default() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a.jpg", b"a");
    touch(dir.path(), "b.jpg", b"b");

    let mut api = MockDatasetApi::new();
    api.expect_first_listing_url()
        .returning(|_| "https://api.test/page1".to_string());
    api.expect_list_page()
        .withf(|_, url| url.ends_with("page1"))
        .times(1)
        .returning(|_, _| {
        Ok(ListingPage {
            stored_names: vec!["a.jpg".into()],
            next_page_url: Some("https://api.test/page2".into()),
        })
    });
    api.expect_list_page()
        .withf(|_, url| url.ends_with("page2"))
        .returning(|_, _| Err(UploadError::Network("reset".into())));
    let uploaded = capture_uploads(&mut api);
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let outcome = run_upload_job(&ctx, &local_spec("reef", dir.path(), Some(3)))
        .await
        .unwrap();
    assert!(!outcome.index_complete);
    assert!(outcome.skipped_existing.is_empty());
    assert_eq!(*uploaded.lock().unwrap(), vec!["a.jpg", "b.jpg"]);
}

#[tokio::test]
async fn test_incomplete_index_fails_job_when_configured() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a.jpg", b"a");

    let mut api = MockDatasetApi::new();
    api.expect_first_listing_url()
        .returning(|_| "https://api.test/page1".to_string());
    api.expect_list_page()
        .returning(|_, _| Err(UploadError::Network("dns".into())));
    api.expect_upload_image().never();
    let fetcher = MockAssetFetcher::new();
    let settings = EngineSettings {
        incomplete_index: IncompleteIndexPolicy::FailJob,
        ..EngineSettings::default()
    };
    let ctx = context(&api, &fetcher, settings);

    let result = run_upload_job(&ctx, &local_spec("reef", dir.path(), Some(3))).await;
    assert!(matches!(result, Err(UploadError::Network(_))));
}

#[tokio::test]
async fn test_completion_failure_keeps_records() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a.jpg", b"a");

    let mut api = MockDatasetApi::new();
    api.expect_create_dataset().returning(|_, _| Ok(11));
    api.expect_upload_image().returning(|_, _, _, _| Ok(201));
    api.expect_trigger_completion()
        .withf(|_, id| *id == 11)
        .times(1)
        .returning(|_, _| Err(UploadError::http(503, "dataset-actions")));
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let mut spec = local_spec("reef", dir.path(), None);
    spec.trigger_completion = true;
    let outcome = run_upload_job(&ctx, &spec).await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert!(outcome.records[0].is_success());
    assert!(matches!(outcome.completion, CompletionStatus::Failed(ref msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_create_dataset_auth_failure_fails_job() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a.jpg", b"a");

    let mut api = MockDatasetApi::new();
    api.expect_create_dataset()
        .returning(|_, _| Err(UploadError::auth("creating dataset")));
    api.expect_upload_image().never();
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    let err = run_upload_job(&ctx, &local_spec("reef", dir.path(), None))
        .await
        .unwrap_err();
    assert!(err.is_auth());
}

fn write_catalog(root: &Path) -> PathBuf {
    fs::create_dir_all(root.join("col")).unwrap();
    fs::write(root.join("catalog.json"), r#"{"type":"Catalog","id":"root"}"#).unwrap();
    let path = root.join("col").join("collection.json");
    fs::write(
        &path,
        r#"{
            "type": "Collection",
            "id": "survey",
            "links": [
                {"rel": "root", "href": "../catalog.json"},
                {"rel": "parent", "href": "../catalog.json"}
            ],
            "assets": {
                "broken.JPG": {"href": "./broken.JPG"},
                "ortho.tif": {"href": "./ortho.tif"},
                "photo.JPG": {"href": "./photo.JPG"},
                "thumbnail.webp": {"href": "./thumbnail.webp"}
            }
        }"#,
    )
    .unwrap();
    path
}

#[tokio::test]
async fn test_catalog_assets_are_staged_uploaded_and_cleaned_up() {
    let catalog_dir = tempdir().unwrap();
    let staging_dir = tempdir().unwrap();
    let collection_path = write_catalog(catalog_dir.path());

    let staged_paths = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
    let seen = staged_paths.clone();
    let mut fetcher = MockAssetFetcher::new();
    fetcher.expect_fetch_to().times(3).returning(move |url, dest| {
        if url.path().ends_with("broken.JPG") {
            return Err(UploadError::http(404, url.to_string()));
        }
        assert!(url.as_str().starts_with("https://host/base/col/"));
        seen.lock().unwrap().push(dest.to_path_buf());
        fs::write(dest, b"pixels").unwrap();
        Ok(6)
    });

    let mut api = MockDatasetApi::new();
    api.expect_create_dataset().returning(|_, _| Ok(77));
    let uploaded = capture_uploads(&mut api);

    let settings = EngineSettings {
        staging_dir: Some(staging_dir.path().to_path_buf()),
        ..EngineSettings::default()
    };
    let ctx = context(&api, &fetcher, settings);
    let spec = DatasetSpec {
        name: "survey".into(),
        source: DatasetSource::RemoteCatalog(RemoteCatalogSource {
            collection_path,
            remote_root: "https://host/base/catalog.json".into(),
        }),
        private: true,
        metadata: None,
        existing_dataset_id: None,
        trigger_completion: false,
    };

    let outcome = run_upload_job(&ctx, &spec).await.unwrap();

    assert_eq!(*uploaded.lock().unwrap(), vec!["ortho.tif", "photo.JPG"]);
    assert_eq!(outcome.unreadable.len(), 1);
    assert_eq!(outcome.unreadable[0].display_name, "broken.JPG");
    assert!(outcome.records.iter().all(|r| r.byte_size == 6));
    for path in staged_paths.lock().unwrap().iter() {
        assert!(!path.exists(), "staged file {} was not removed", path.display());
        assert!(path.starts_with(staging_dir.path()));
    }
    assert_eq!(fs::read_dir(staging_dir.path()).unwrap().count(), 0);
}

/// Keeps the level and formatted fields of every emitted event.
struct EventCollector {
    events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCollector {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), format!("{event:?}")));
    }
}

#[tokio::test]
async fn test_each_skipped_file_is_logged_at_info() {
    use tracing_subscriber::prelude::*;

    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::Registry::default().with(EventCollector {
        events: events.clone(),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempdir().unwrap();
    touch(dir.path(), "kept.jpg", b"k");
    touch(dir.path(), "stored.jpg", b"s");

    let mut api = MockDatasetApi::new();
    listing_with(&["stored.jpg"], &mut api);
    let uploaded = capture_uploads(&mut api);
    let fetcher = MockAssetFetcher::new();
    let ctx = context(&api, &fetcher, EngineSettings::default());

    run_upload_job(&ctx, &local_spec("reef", dir.path(), Some(4)))
        .await
        .unwrap();
    assert_eq!(*uploaded.lock().unwrap(), vec!["kept.jpg"]);

    let events = events.lock().unwrap();
    assert!(
        events.iter().any(|(level, msg)| *level == tracing::Level::INFO
            && msg.contains("Already present remotely")
            && msg.contains("stored.jpg")),
        "expected an INFO event for the skipped file, got: {events:?}"
    );
}
