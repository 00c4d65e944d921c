//! Remote asset catalog (STAC collection) loading and href rebasing.
//!
//! A collection document lives somewhere under a local copy of a catalog
//! tree. Its assets are usually relative hrefs. The same tree is served
//! remotely, so every asset is made fetchable by taking its path relative to
//! the local root and joining that delta onto the remote root URL.

use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::UploadError;

const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Deserialize)]
struct StacCollection {
    id: String,
    #[serde(default)]
    links: Vec<StacLink>,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
}

#[derive(Debug, Deserialize)]
struct StacLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct StacAsset {
    href: String,
}

/// One declared asset, already rebased onto the remote root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogAsset {
    /// Asset key in the collection; used as the candidate file name.
    pub key: String,
    pub url: Url,
}

/// A loaded collection with absolute asset URLs, in asset-key order.
#[derive(Debug, Clone)]
pub struct ResolvedCollection {
    pub id: String,
    pub local_root: PathBuf,
    pub parent_dir: PathBuf,
    pub assets: Vec<CatalogAsset>,
}

/// Load the collection document at `collection_path` and rebase its assets
/// onto `remote_root` (the remote URL of the catalog root, with or without a
/// trailing `/catalog.json`).
///
/// Fails if the document cannot be read or parsed, if its `root` or `parent`
/// link is missing or points to a missing file, or if an asset lies outside
/// the catalog root.
pub fn load_collection(
    collection_path: &Path,
    remote_root: &str,
) -> Result<ResolvedCollection, UploadError> {
    let raw = std::fs::read_to_string(collection_path)
        .map_err(|e| UploadError::io(collection_path, e))?;
    let collection: StacCollection = serde_json::from_str(&raw).map_err(|e| {
        UploadError::Validation(format!(
            "unparsable collection {}: {e}",
            collection_path.display()
        ))
    })?;

    let collection_dir = normalize_lexically(
        collection_path
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    let root_file = linked_file(&collection, "root", &collection_dir, collection_path)?;
    let parent_file = linked_file(&collection, "parent", &collection_dir, collection_path)?;
    let local_root = catalog_dir(&root_file);
    let parent_dir = catalog_dir(&parent_file);
    if !parent_dir.starts_with(&local_root) {
        return Err(UploadError::Validation(format!(
            "parent catalog {} is outside catalog root {}",
            parent_dir.display(),
            local_root.display()
        )));
    }
    debug!(
        collection = %collection.id,
        root = %local_root.display(),
        parent = %parent_dir.display(),
        "Resolved catalog hierarchy"
    );

    let mut assets = Vec::with_capacity(collection.assets.len());
    for (key, asset) in &collection.assets {
        let url = rebase_asset_href(&local_root, &collection_dir, remote_root, &asset.href)?;
        assets.push(CatalogAsset {
            key: key.clone(),
            url,
        });
    }
    info!(
        collection = %collection.id,
        assets = assets.len(),
        "Loaded remote catalog collection"
    );

    Ok(ResolvedCollection {
        id: collection.id,
        local_root,
        parent_dir,
        assets,
    })
}

/// Turn an asset href into an absolute remote URL.
///
/// Absolute URLs are kept. Relative hrefs are resolved against
/// `container_dir` (the directory holding the collection document), and the
/// resulting path's delta from `local_root` is joined onto `remote_root`.
pub fn rebase_asset_href(
    local_root: &Path,
    container_dir: &Path,
    remote_root: &str,
    href: &str,
) -> Result<Url, UploadError> {
    if let Ok(url) = Url::parse(href) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url);
        }
    }

    let local = normalize_lexically(&container_dir.join(href));
    let root = normalize_lexically(local_root);
    let delta = local.strip_prefix(&root).map_err(|_| {
        UploadError::Validation(format!(
            "asset {} is outside catalog root {}",
            local.display(),
            root.display()
        ))
    })?;

    let trimmed = remote_root.trim_end_matches('/');
    let base = trimmed
        .strip_suffix(CATALOG_FILE)
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    let mut url = Url::parse(base)
        .map_err(|e| UploadError::Validation(format!("invalid remote root {remote_root}: {e}")))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            UploadError::Validation(format!("remote root {remote_root} cannot carry a path"))
        })?;
        segments.pop_if_empty();
        for component in delta.components() {
            if let Component::Normal(part) = component {
                segments.push(&part.to_string_lossy());
            }
        }
    }
    Ok(url)
}

fn linked_file(
    collection: &StacCollection,
    rel: &str,
    collection_dir: &Path,
    collection_path: &Path,
) -> Result<PathBuf, UploadError> {
    let link = collection
        .links
        .iter()
        .find(|l| l.rel == rel)
        .ok_or_else(|| {
            UploadError::Validation(format!(
                "collection {} has no '{rel}' link",
                collection_path.display()
            ))
        })?;
    let file = normalize_lexically(&collection_dir.join(&link.href));
    if !file.is_file() {
        return Err(UploadError::Validation(format!(
            "'{rel}' catalog {} of collection {} does not exist",
            file.display(),
            collection_path.display()
        )));
    }
    Ok(file)
}

/// Directory a catalog document stands for: its parent if it is a `.json` file.
fn catalog_dir(file: &Path) -> PathBuf {
    match file.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            file.parent().map(Path::to_path_buf).unwrap_or_default()
        }
        _ => file.to_path_buf(),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
