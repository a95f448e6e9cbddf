//! Archive manifests and the buffers fetched for them.

use crate::{errors::GatewayError, models::key::ObjectKey};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashSet;

const DEFAULT_ARCHIVE_NAME: &str = "archive.zip";

/// One file requested for zipping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: ObjectKey,
    /// Name of the entry inside the archive.
    pub display_name: String,
}

/// Ordered, validated, de-duplicated list of files to zip.
#[derive(Clone, Debug)]
pub struct ArchiveManifest {
    entries: Vec<ManifestEntry>,
}

impl ArchiveManifest {
    /// Build a manifest from raw `(key, display name)` pairs.
    ///
    /// Fails on an empty request or any entry that normalizes to nothing.
    /// Repeated keys keep their first occurrence. Display names are reduced
    /// to a relative path (see [`entry_name`]) and default to the key's last
    /// segment; colliding names are kept as-is.
    pub fn build<I>(requested: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (position, (raw_key, name)) in requested.into_iter().enumerate() {
            let key = ObjectKey::normalize(&raw_key);
            if key.is_empty() {
                return Err(GatewayError::validation(format!(
                    "archive entry #{} (`{}`) does not name a file",
                    position + 1,
                    raw_key
                )));
            }
            if !seen.insert(key.clone()) {
                continue;
            }
            let display_name = name
                .as_deref()
                .and_then(entry_name)
                .unwrap_or_else(|| key.file_name().to_string());
            entries.push(ManifestEntry { key, display_name });
        }

        if entries.is_empty() {
            return Err(GatewayError::validation("archive manifest is empty"));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Relative path for a caller-chosen entry name.
///
/// Backslashes count as separators. Empty, `.` and `..` segments are
/// dropped, so an extracted entry can never land outside the target
/// directory. `None` when nothing usable is left.
pub fn entry_name(requested: &str) -> Option<String> {
    let cleaned = requested
        .replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/");
    (!cleaned.is_empty()).then_some(cleaned)
}

/// A manifest entry fully read into memory, owned by one archive request.
#[derive(Clone, Debug)]
pub struct DownloadedEntry {
    pub buffer: Bytes,
    pub name: String,
    pub source_key: ObjectKey,
}

/// JSON body accepted by `POST /archive`.
#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub name: Option<String>,
    pub files: Vec<ArchiveFileRequest>,
}

/// A bare key or a key with its name inside the archive.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ArchiveFileRequest {
    Key(String),
    Entry { key: String, name: Option<String> },
}

impl ArchiveFileRequest {
    pub fn into_pair(self) -> (String, Option<String>) {
        match self {
            ArchiveFileRequest::Key(key) => (key, None),
            ArchiveFileRequest::Entry { key, name } => (key, name),
        }
    }
}

/// Download name for the archive; always ends in `.zip`.
pub fn archive_file_name(requested: Option<&str>) -> String {
    let base = requested
        .map(|name| name.rsplit('/').next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_ARCHIVE_NAME);
    if base.to_ascii_lowercase().ends_with(".zip") {
        base.to_string()
    } else {
        format!("{}.zip", base)
    }
}
