//! Source enumeration: turns a dataset source into the canonical, ordered,
//! collision-free list of files to consider for upload.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::load_collection;
use crate::error::UploadError;
use crate::naming::{resolve_display_name, NameCollisionTable};

/// Image extensions accepted from local directories (case-insensitive).
pub const LOCAL_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];
/// Image extensions accepted from remote catalogs (case-insensitive).
pub const CATALOG_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif"];

/// Where the images of one dataset come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    LocalDirectory(LocalDirectorySource),
    RemoteCatalog(RemoteCatalogSource),
}

/// A directory walked recursively for image files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDirectorySource {
    pub path: PathBuf,
}

/// A STAC collection whose assets are fetched from a remote copy of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCatalogSource {
    /// Local path of the collection document.
    pub collection_path: PathBuf,
    /// Remote URL of the catalog root.
    pub remote_root: String,
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::LocalDirectory(d) => write!(f, "directory {}", d.path.display()),
            DatasetSource::RemoteCatalog(c) => write!(
                f,
                "collection {} (remote root {})",
                c.collection_path.display(),
                c.remote_root
            ),
        }
    }
}

/// Where the bytes of one file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    Local(PathBuf),
    /// Must be staged to a local file before upload.
    Remote(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Unique within one enumeration run.
    pub display_name: String,
    pub source: ResourceRef,
}

/// Enumerate `source` completely. Any failure fails the whole enumeration,
/// since collision suffixes depend on an ordered, complete pass.
pub fn enumerate(source: &DatasetSource) -> Result<Vec<FileEntry>, UploadError> {
    let entries = match source {
        DatasetSource::LocalDirectory(dir) => enumerate_local(&dir.path)?,
        DatasetSource::RemoteCatalog(catalog) => enumerate_catalog(catalog)?,
    };
    info!(source = %source, files = entries.len(), "Enumerated source");
    Ok(entries)
}

/// [`enumerate`] on the blocking thread pool.
pub async fn enumerate_blocking(source: DatasetSource) -> Result<Vec<FileEntry>, UploadError> {
    tokio::task::spawn_blocking(move || enumerate(&source))
        .await
        .map_err(|e| UploadError::Task(format!("enumeration task failed: {e}")))?
}

fn enumerate_local(dir: &Path) -> Result<Vec<FileEntry>, UploadError> {
    if !dir.is_dir() {
        return Err(UploadError::Validation(format!(
            "{} is not an accessible directory",
            dir.display()
        )));
    }

    let mut table = NameCollisionTable::new();
    let mut entries = Vec::new();
    // Sorting by file name at every level yields lexicographic path order.
    for item in WalkDir::new(dir).sort_by_file_name() {
        let item = item.map_err(|e| {
            UploadError::Validation(format!("cannot walk {}: {e}", dir.display()))
        })?;
        if !item.file_type().is_file() || !has_image_extension(item.path(), LOCAL_IMAGE_EXTENSIONS)
        {
            continue;
        }
        let Some(display_name) = resolve_display_name(item.path(), &mut table) else {
            continue;
        };
        debug!(path = %item.path().display(), display_name = %display_name, "Discovered image");
        entries.push(FileEntry {
            display_name,
            source: ResourceRef::Local(item.into_path()),
        });
    }
    Ok(entries)
}

fn enumerate_catalog(catalog: &RemoteCatalogSource) -> Result<Vec<FileEntry>, UploadError> {
    let collection = load_collection(&catalog.collection_path, &catalog.remote_root)?;

    let mut table = NameCollisionTable::new();
    let mut seen_urls = HashSet::new();
    let mut entries = Vec::new();
    for asset in collection.assets {
        let base_name = asset.key.rsplit('/').next().unwrap_or(&asset.key);
        if !has_image_extension(Path::new(base_name), CATALOG_IMAGE_EXTENSIONS) {
            debug!(asset = %asset.key, "Skipping non-image asset");
            continue;
        }
        if !seen_urls.insert(asset.url.clone()) {
            warn!(asset = %asset.key, url = %asset.url, "Asset points at an already listed file, skipping it");
            continue;
        }
        let display_name = table.resolve(&asset.key, base_name);
        entries.push(FileEntry {
            display_name,
            source: ResourceRef::Remote(asset.url),
        });
    }
    Ok(entries)
}

fn has_image_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn catalog_source(assets: &str) -> (tempfile::TempDir, DatasetSource) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("col")).unwrap();
        fs::write(dir.path().join("catalog.json"), r#"{"id":"root"}"#).unwrap();
        let collection_path = dir.path().join("col").join("collection.json");
        let document = format!(
            r#"{{"id": "survey",
                "links": [{{"rel": "root", "href": "../catalog.json"}}, {{"rel": "parent", "href": "../catalog.json"}}],
                "assets": {assets}}}"#
        );
        fs::write(&collection_path, document).unwrap();
        let source = DatasetSource::RemoteCatalog(RemoteCatalogSource {
            collection_path,
            remote_root: "https://host/base".into(),
        });
        (dir, source)
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.display_name.as_str()).collect()
    }

    #[test]
    fn catalog_assets_sharing_an_href_are_listed_once() {
        let (_dir, source) = catalog_source(
            r#"{"a/photo.JPG": {"href": "./photo.JPG"}, "b/photo.JPG": {"href": "./photo.JPG"}}"#,
        );
        let entries = enumerate(&source).unwrap();
        assert_eq!(names(&entries), vec!["photo.JPG"]);
        assert_eq!(
            entries[0].source,
            ResourceRef::Remote(Url::parse("https://host/base/col/photo.JPG").unwrap())
        );
    }

    #[test]
    fn catalog_assets_with_the_same_base_name_get_copy_suffixes() {
        let (_dir, source) = catalog_source(
            r#"{"a/photo.JPG": {"href": "./a/photo.JPG"}, "b/photo.JPG": {"href": "./b/photo.JPG"}, "notes.txt": {"href": "./notes.txt"}}"#,
        );
        let entries = enumerate(&source).unwrap();
        assert_eq!(names(&entries), vec!["photo.JPG", "photo_Copy_1.JPG"]);
    }
}
