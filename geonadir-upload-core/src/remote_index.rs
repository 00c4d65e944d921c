//! Remote index: the set of stored names a dataset already holds, built by
//! walking the paginated listing endpoint once per job.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::contract::{AuthToken, DatasetApi, DatasetId};
use crate::error::UploadError;
use crate::naming::RemoteNamePolicy;

/// Snapshot of stored names. Immutable once built; not refreshed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFileIndex {
    names: HashSet<String>,
    complete: bool,
    pages_fetched: usize,
}

impl RemoteFileIndex {
    /// Index of a dataset known to be empty (freshly created).
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
            complete: true,
            pages_fetched: 0,
        }
    }

    pub fn contains(&self, remote_name: &str) -> bool {
        self.names.contains(remote_name)
    }

    /// `false` if the walk stopped early; absence from the index then proves nothing.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

impl FromIterator<String> for RemoteFileIndex {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            names: iter.into_iter().collect(),
            complete: true,
            pages_fetched: 0,
        }
    }
}

/// Walk every listing page of `dataset_id` and collect normalised stored names.
///
/// An authentication failure aborts with `UploadError::Auth`. Any other
/// failure, or a `next` cursor that revisits a page, ends the walk and
/// returns what was gathered, marked incomplete.
pub async fn fetch_existing_names<A>(
    api: &A,
    auth: &AuthToken,
    dataset_id: DatasetId,
    policy: &RemoteNamePolicy,
) -> Result<RemoteFileIndex, UploadError>
where
    A: DatasetApi + ?Sized,
{
    let mut index = RemoteFileIndex {
        names: HashSet::new(),
        complete: true,
        pages_fetched: 0,
    };
    let mut visited = HashSet::new();
    let mut next = Some(api.first_listing_url(dataset_id));

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            warn!(
                dataset_id,
                url = %url,
                collected = index.names.len(),
                "[INDEX] Listing cursor points back to a visited page, index is incomplete"
            );
            index.complete = false;
            break;
        }
        debug!(dataset_id, url = %url, "[INDEX] Fetching listing page");
        let page = match api.list_page(auth, &url).await {
            Ok(page) => page,
            Err(e) if e.is_auth() => {
                error!(dataset_id, url = %url, "[INDEX] Authentication failed while listing dataset files");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    dataset_id,
                    url = %url,
                    error = %e,
                    collected = index.names.len(),
                    "[INDEX] Listing walk aborted, index is incomplete"
                );
                index.complete = false;
                break;
            }
        };
        index.pages_fetched += 1;
        index.names.extend(
            page.stored_names
                .iter()
                .map(|raw| policy.normalize_stored_name(raw)),
        );
        next = page.next_page_url;
    }

    info!(
        dataset_id,
        names = index.names.len(),
        pages = index.pages_fetched,
        complete = index.complete,
        "[INDEX] Remote index built"
    );
    Ok(index)
}
