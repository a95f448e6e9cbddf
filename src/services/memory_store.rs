//! In-process object store used by `--backend memory` and the test suites.

use crate::{
    models::{
        key::ObjectKey,
        object::{Acl, ObjectMetadata, PutOptions, PutOutcome},
        range::ByteRange,
    },
    services::object_store::{
        ByteStream, ObjectStore, StoreError, StoreResult, cancellable, cancelled_io_error,
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    io,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Chunk size used when replaying stored bytes as a stream.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub etag: String,
    pub acl: Acl,
    pub metadata: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectKey, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the streaming `put` path.
    pub async fn insert(
        &self,
        key: &ObjectKey,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> PutOutcome {
        let data = data.into();
        let outcome = PutOutcome {
            etag: format!("{:x}", md5::compute(&data)),
            size: data.len() as u64,
        };
        let object = StoredObject {
            data,
            content_type: content_type.map(str::to_string),
            etag: outcome.etag.clone(),
            acl: Acl::default(),
            metadata: BTreeMap::new(),
            last_modified: Utc::now(),
        };
        self.objects.write().await.insert(key.clone(), object);
        outcome
    }

    /// Snapshot of a stored object, including its user metadata.
    pub async fn object(&self, key: &ObjectKey) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn stat(&self, key: &ObjectKey) -> StoreResult<ObjectMetadata> {
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(ObjectMetadata {
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
        })
    }

    async fn get(
        &self,
        key: &ObjectKey,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ByteStream> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let data = {
            let objects = self.objects.read().await;
            objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?
                .data
                .clone()
        };

        let data = match range {
            Some(range) => {
                let end = (range.end as usize).min(data.len().saturating_sub(1));
                let start = range.start as usize;
                if start > end || start >= data.len() {
                    return Err(StoreError::Backend(format!(
                        "range {}-{} outside object `{}`",
                        range.start, range.end, key
                    )));
                }
                data.slice(start..=end)
            }
            None => data,
        };

        let chunks: Vec<io::Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK)
            .map(|offset| Ok(data.slice(offset..(offset + READ_CHUNK).min(data.len()))))
            .collect();
        Ok(cancellable(
            Box::pin(futures::stream::iter(chunks)),
            cancel.clone(),
        ))
    }

    async fn put(
        &self,
        key: &ObjectKey,
        mut body: ByteStream,
        options: PutOptions,
        cancel: &CancellationToken,
    ) -> StoreResult<PutOutcome> {
        let mut buffer = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Io(cancelled_io_error())),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => break,
            }
        }

        let data = buffer.freeze();
        let outcome = PutOutcome {
            etag: format!("{:x}", md5::compute(&data)),
            size: data.len() as u64,
        };
        let object = StoredObject {
            data,
            content_type: options.content_type,
            etag: outcome.etag.clone(),
            acl: options.acl,
            metadata: options.metadata,
            last_modified: Utc::now(),
        };
        self.objects.write().await.insert(key.clone(), object);
        Ok(outcome)
    }

    async fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::drain;

    #[tokio::test]
    async fn ranged_get_returns_the_slice() {
        let store = MemoryObjectStore::new();
        let key = ObjectKey::normalize("clip.mp4");
        store.insert(&key, &b"0123456789"[..], Some("video/mp4")).await;

        let stream = store
            .get(&key, Some(ByteRange::new(2, 5)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(drain(stream).await.unwrap(), Bytes::from_static(b"2345"));

        let meta = store.stat(&key).await.unwrap();
        assert_eq!(meta.size, 10);
        assert_eq!(meta.content_type.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let store = MemoryObjectStore::new();
        let key = ObjectKey::normalize("nope");
        assert!(matches!(store.stat(&key).await, Err(StoreError::NotFound(_))));
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn failed_body_stores_nothing() {
        let store = MemoryObjectStore::new();
        let key = ObjectKey::normalize("broken.bin");
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::InvalidData, "too large")),
        ];
        let result = store
            .put(
                &key,
                Box::pin(futures::stream::iter(chunks)),
                PutOptions::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }
}
