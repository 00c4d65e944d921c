//! Filename reconciliation: collision-free display names and the
//! display-name <-> stored-name translation used for resume.
//!
//! Two independent pieces live here:
//! - [`NameCollisionTable`] hands out a unique display name per source file
//!   within one enumeration run (`a.jpg`, `a_Copy_1.jpg`, ...).
//! - [`RemoteNamePolicy`] is the only place that knows how a display name is
//!   rewritten for the server and back. Every resume comparison goes through it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Display name -> key of the source that owns it. Grows monotonically for one run.
///
/// Owners are compared as raw OS strings, so two paths that only differ in
/// non-UTF-8 bytes never share a display name.
#[derive(Debug, Default)]
pub struct NameCollisionTable {
    owners: HashMap<String, OsString>,
}

impl NameCollisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a display name for `source_key` starting from `base_name`.
    ///
    /// Returns `base_name` if it is free or already owned by `source_key`,
    /// otherwise the first free `<stem>_Copy_<k><ext>` with `k >= 1`.
    pub fn resolve(&mut self, source_key: impl AsRef<OsStr>, base_name: &str) -> String {
        let source_key = source_key.as_ref();
        let (stem, ext) = split_extension(base_name);
        let mut candidate = base_name.to_string();
        let mut copy = 1u32;
        loop {
            match self.owners.get(&candidate) {
                None => {
                    self.owners
                        .insert(candidate.clone(), source_key.to_os_string());
                    return candidate;
                }
                Some(owner) if owner == source_key => return candidate,
                Some(_) => {
                    candidate = format!("{stem}_Copy_{copy}{ext}");
                    copy += 1;
                }
            }
        }
    }

    pub fn owner(&self, display_name: &str) -> Option<&OsStr> {
        self.owners.get(display_name).map(OsString::as_os_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Resolve the display name of a local file. `None` if the path has no file name.
pub fn resolve_display_name(path: &Path, table: &mut NameCollisionTable) -> Option<String> {
    let base_name = path.file_name()?.to_string_lossy();
    Some(table.resolve(path, &base_name))
}

/// Split `name` into stem and extension (extension keeps its dot).
/// Leading dots belong to the stem, so `.hidden` has no extension.
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(i) => name.split_at(leading + i),
        None => (name, ""),
    }
}

/// How display names are rewritten before being sent to the server.
///
/// Resume compares translated names, so a dataset must be resumed with the
/// translation it was filled with. Datasets uploaded by tools that send raw
/// file names need `Verbatim`; under `Escaped` every name containing a `-`,
/// a space or any other escaped character would be uploaded again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameTranslation {
    /// Escape everything outside `[A-Za-z0-9_.]` so the server stores the name untouched.
    #[default]
    Escaped,
    /// Send names as they are.
    Verbatim,
}

/// The single invertible translation between display names and stored names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteNamePolicy {
    pub translation: NameTranslation,
    /// Drop a storage de-duplication suffix (`_AbC1234` before the extension) from listed names.
    pub strip_storage_suffix: bool,
}

impl RemoteNamePolicy {
    pub fn new(translation: NameTranslation, strip_storage_suffix: bool) -> Self {
        Self {
            translation,
            strip_storage_suffix,
        }
    }

    /// Name the server will store for `display_name`.
    pub fn to_remote_name(&self, display_name: &str) -> String {
        match self.translation {
            NameTranslation::Verbatim => display_name.to_string(),
            NameTranslation::Escaped => {
                let mut out = String::with_capacity(display_name.len());
                for c in display_name.chars() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        out.push(c);
                    } else if c == '-' {
                        out.push_str("--");
                    } else {
                        out.push_str(&format!("-{:X}-", c as u32));
                    }
                }
                out
            }
        }
    }

    /// Inverse of [`to_remote_name`](Self::to_remote_name). Names that are not
    /// valid escapes (uploaded by other tools) come back unchanged.
    pub fn to_original_name(&self, remote_name: &str) -> String {
        match self.translation {
            NameTranslation::Verbatim => remote_name.to_string(),
            NameTranslation::Escaped => {
                unescape(remote_name).unwrap_or_else(|| remote_name.to_string())
            }
        }
    }

    /// Reduce a listing value (bare name, path or URL) to the stored file name.
    pub fn normalize_stored_name(&self, raw: &str) -> String {
        let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
        let last = without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(without_query);
        if self.strip_storage_suffix {
            strip_storage_suffix(last).unwrap_or_else(|| last.to_string())
        } else {
            last.to_string()
        }
    }
}

fn unescape(remote_name: &str) -> Option<String> {
    let mut out = String::with_capacity(remote_name.len());
    let mut chars = remote_name.chars();
    while let Some(c) = chars.next() {
        if c != '-' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        loop {
            match chars.next()? {
                '-' => break,
                h if h.is_ascii_hexdigit() => hex.push(h),
                _ => return None,
            }
        }
        if hex.is_empty() {
            out.push('-');
        } else {
            out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
        }
    }
    Some(out)
}

/// `IMG_0001_AbC1234.JPG` -> `IMG_0001.JPG`
fn strip_storage_suffix(name: &str) -> Option<String> {
    let (stem, ext) = split_extension(name);
    if ext.is_empty() || stem.len() <= 8 || !stem.is_char_boundary(stem.len() - 8) {
        return None;
    }
    let (head, tail) = stem.split_at(stem.len() - 8);
    let mut tail_chars = tail.chars();
    if tail_chars.next() != Some('_') || !tail_chars.all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!("{head}{ext}"))
}
