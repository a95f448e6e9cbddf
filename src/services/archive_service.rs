//! Fetch, measure and transmit passes of an archive download.

use crate::{
    errors::GatewayError,
    models::archive::{ArchiveManifest, DownloadedEntry, ManifestEntry},
    services::{
        object_store::{ByteStream, ObjectStore, drain},
        zip_codec::{DosTimestamp, EncodedArchive, check_entry_count, encode_entry},
    },
};
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{io, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Packages stored objects into zip archives.
#[derive(Clone)]
pub struct ArchiveService {
    store: Arc<dyn ObjectStore>,
    compression_level: u32,
    fetch_concurrency: usize,
}

/// An archive whose exact size is known and whose bytes can now be sent.
pub struct PreparedArchive {
    archive: EncodedArchive,
    pub content_length: u64,
    /// Keys that could not be fetched and were left out.
    pub skipped: Vec<String>,
}

impl ArchiveService {
    pub fn new(store: Arc<dyn ObjectStore>, compression_level: u32, fetch_concurrency: usize) -> Self {
        Self {
            store,
            compression_level,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Fetch every entry and run the measure pass.
    ///
    /// Entries that fail to download are logged and skipped; the archive
    /// only fails when none survive. A cancelled token aborts everything.
    /// Compression happens here, on blocking threads, and its output is
    /// kept for the transmit pass.
    pub async fn prepare(
        &self,
        manifest: &ArchiveManifest,
        cancel: &CancellationToken,
    ) -> Result<PreparedArchive, GatewayError> {
        let results: Vec<_> = stream::iter(manifest.entries().iter().cloned())
            .map(|entry| self.fetch(entry, cancel.clone()))
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut entries = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (entry, result) in manifest.entries().iter().zip(results) {
            match result {
                Ok(downloaded) => entries.push(downloaded),
                Err(err) if err.is_benign() => return Err(err),
                Err(err) => {
                    tracing::warn!(key = %entry.key, "leaving entry out of archive: {}", err);
                    skipped.push(entry.key.to_string());
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if entries.is_empty() {
            return Err(GatewayError::NoFilesAvailable);
        }

        check_entry_count(entries.len()).map_err(zip_error)?;
        let mut encoded = Vec::with_capacity(entries.len());
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let level = self.compression_level;
            let packed = tokio::task::spawn_blocking(move || encode_entry(entry, level))
                .await
                .map_err(|err| GatewayError::Internal(format!("archive encoder failed: {}", err)))?
                .map_err(zip_error)?;
            encoded.push(packed);
        }

        let modified = DosTimestamp::from_datetime(Utc::now());
        let archive = EncodedArchive::new(encoded, modified).map_err(zip_error)?;
        let content_length = archive.measure().map_err(zip_error)?;
        tracing::debug!(
            entries = archive.entry_count(),
            skipped = skipped.len(),
            content_length,
            "archive measured"
        );

        Ok(PreparedArchive {
            archive,
            content_length,
            skipped,
        })
    }

    async fn fetch(
        &self,
        entry: ManifestEntry,
        cancel: CancellationToken,
    ) -> Result<DownloadedEntry, GatewayError> {
        let stream = self.store.get(&entry.key, None, &cancel).await?;
        let buffer = drain(stream).await.map_err(|err| {
            if err.kind() == io::ErrorKind::Interrupted {
                GatewayError::Cancelled
            } else {
                GatewayError::Upstream(format!("reading `{}`: {}", entry.key, err))
            }
        })?;
        Ok(DownloadedEntry {
            buffer,
            name: entry.display_name,
            source_key: entry.key,
        })
    }
}

impl PreparedArchive {
    pub fn entry_count(&self) -> usize {
        self.archive.entry_count()
    }

    /// The transmit pass. Yields exactly `content_length` bytes.
    pub fn into_stream(self) -> ByteStream {
        Box::pin(stream::iter(self.archive.segments()))
    }
}

fn zip_error(err: io::Error) -> GatewayError {
    if err.kind() == io::ErrorKind::InvalidInput {
        GatewayError::validation(err.to_string())
    } else {
        GatewayError::Internal(format!("packaging archive: {}", err))
    }
}
