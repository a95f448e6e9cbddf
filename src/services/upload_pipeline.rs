//! Multipart ingestion into the object store.
//!
//! Each file part is filtered, assigned a key below the request's upload
//! directory and streamed straight into `ObjectStore::put` while its size is
//! counted. Text parts are collected into the form map; a `directory` text
//! part only counts when it arrives before the file parts.

use crate::{
    errors::{GatewayError, UploadRejection},
    models::{
        key::{ObjectKey, extension_of},
        object::{PutOptions, PutOutcome},
        upload::{
            MetadataSource, UploadContext, UploadDescriptor, UploadMode, UploadedObjectRecord,
        },
    },
    services::{
        content::guess_content_type,
        object_store::{ByteStream, ObjectStore},
    },
};
use axum::{
    extract::multipart::{Field, Multipart, MultipartError},
    http::HeaderMap,
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::{collections::BTreeMap, io, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chunks buffered between the multipart reader and the store.
const PIPE_DEPTH: usize = 8;
const ENCODING_SUFFIX: &str = "-encoding";
const BASE64_MARKER: &str = "base64";

/// Everything a successful multipart request produced.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub files: Vec<UploadedObjectRecord>,
    pub form: BTreeMap<String, String>,
}

/// One configured upload route.
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    descriptor: UploadDescriptor,
    public_base_path: String,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        descriptor: UploadDescriptor,
        public_base_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            descriptor,
            public_base_path: public_base_path.into(),
        }
    }

    pub fn descriptor(&self) -> &UploadDescriptor {
        &self.descriptor
    }

    /// Consume the multipart body, storing every accepted file.
    ///
    /// The first failure aborts the request. Files stored before it stay in
    /// the store but no record is returned for them.
    pub async fn ingest(
        &self,
        headers: &HeaderMap,
        mut multipart: Multipart,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, GatewayError> {
        let mut directory = headers
            .get(self.descriptor.directory.header.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
            .map(ObjectKey::normalize);
        let mut outcome = UploadOutcome::default();

        while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
            let field_name = field.name().unwrap_or_default().to_string();
            let Some(raw_file_name) = field.file_name().map(str::to_string) else {
                let value = field.text().await.map_err(malformed)?;
                if directory.is_none()
                    && field_name == self.descriptor.directory.field
                    && !value.trim().is_empty()
                {
                    directory = Some(ObjectKey::normalize(&value));
                }
                outcome.form.insert(field_name, value);
                continue;
            };

            self.check_field(&field_name, outcome.files.len())?;
            let directory = directory.clone().ok_or_else(|| UploadRejection::MissingDirectory {
                header: self.descriptor.directory.header.clone(),
                field: self.descriptor.directory.field.clone(),
            })?;

            let original_name = original_file_name(&raw_file_name);
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| guess_content_type(&original_name));
            check_extension(&self.descriptor, &original_name)?;
            check_type(&self.descriptor, &original_name, &content_type)?;

            let ctx = UploadContext {
                field_name,
                original_name,
                content_type,
                directory,
                form: outcome.form.clone(),
            };
            let record = self.store_file(&mut field, &ctx, cancel).await?;
            tracing::debug!(key = %record.key, size = record.size, "upload stored");
            outcome.files.push(record);
        }

        if outcome.files.is_empty() {
            return Err(UploadRejection::NoFile.into());
        }
        Ok(outcome)
    }

    fn check_field(&self, field_name: &str, stored: usize) -> Result<(), UploadRejection> {
        let max = match self.descriptor.mode {
            UploadMode::Any => return Ok(()),
            UploadMode::Single => 1,
            UploadMode::Multiple { max_count } => max_count,
        };
        if field_name != self.descriptor.field_name {
            return Err(UploadRejection::UnexpectedField(field_name.to_string()));
        }
        if stored >= max {
            return Err(UploadRejection::TooManyFiles {
                field: field_name.to_string(),
                max,
            });
        }
        Ok(())
    }

    async fn store_file(
        &self,
        field: &mut Field<'_>,
        ctx: &UploadContext,
        cancel: &CancellationToken,
    ) -> Result<UploadedObjectRecord, GatewayError> {
        let filename = self.resolve_filename(ctx).await?;
        let key = ctx.directory.join(&filename);
        if key.is_empty() {
            return Err(GatewayError::validation(format!(
                "upload of `{}` does not resolve to an object key",
                ctx.original_name
            )));
        }

        let options = PutOptions {
            content_type: Some(ctx.content_type.clone()),
            metadata: sanitize_metadata(self.resolve_metadata(ctx).await?),
            acl: self.descriptor.acl,
        };
        let outcome = self
            .pump(field, &key, &ctx.original_name, options, cancel)
            .await?;

        Ok(UploadedObjectRecord {
            location: self.location(&key),
            key,
            etag: outcome.etag,
            size: outcome.size,
            content_type: ctx.content_type.clone(),
        })
    }

    async fn resolve_filename(&self, ctx: &UploadContext) -> Result<String, GatewayError> {
        let name = match (&self.descriptor.filename_resolver, &self.descriptor.fixed_filename) {
            (Some(resolver), _) => resolver
                .resolve(ctx)
                .await
                .map_err(|err| GatewayError::Internal(format!("filename resolver failed: {:#}", err)))?,
            (None, Some(fixed)) => fixed.clone(),
            (None, None) => ctx.original_name.clone(),
        };
        Ok(name)
    }

    /// Base attributes with the caller's metadata merged over them.
    async fn resolve_metadata(
        &self,
        ctx: &UploadContext,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let mut metadata = BTreeMap::from([
            ("originalname".to_string(), ctx.original_name.clone()),
            ("fieldname".to_string(), ctx.field_name.clone()),
            ("mimetype".to_string(), ctx.content_type.clone()),
            ("directory".to_string(), ctx.directory.to_string()),
        ]);
        let extra = match &self.descriptor.metadata {
            MetadataSource::None => BTreeMap::new(),
            MetadataSource::Static(values) => values.clone(),
            MetadataSource::Resolver(resolver) => resolver
                .resolve(ctx)
                .await
                .map_err(|err| GatewayError::Internal(format!("metadata resolver failed: {:#}", err)))?,
        };
        metadata.extend(extra);
        Ok(metadata)
    }

    /// Feed the part into `put` through a bounded channel, enforcing the
    /// size limit. A limit violation poisons the stream so the store drops
    /// what it received.
    async fn pump(
        &self,
        field: &mut Field<'_>,
        key: &ObjectKey,
        filename: &str,
        options: PutOptions,
        cancel: &CancellationToken,
    ) -> Result<PutOutcome, GatewayError> {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PIPE_DEPTH);
        let body: ByteStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let limit = self.descriptor.max_size.limit();

        let reader = async move {
            let mut received = 0u64;
            loop {
                let chunk = match field.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => return Ok(received),
                    Err(err) => {
                        let message = err.to_string();
                        let _ = tx.send(Err(io::Error::other(message.clone()))).await;
                        return Err(GatewayError::from(UploadRejection::Malformed(message)));
                    }
                };
                received += chunk.len() as u64;
                if let Some(limit) = limit {
                    if received > limit {
                        let _ = tx
                            .send(Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "upload exceeds the size limit",
                            )))
                            .await;
                        return Err(UploadRejection::TooLarge {
                            filename: filename.to_string(),
                            limit,
                        }
                        .into());
                    }
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    // The store stopped reading; its own error is reported.
                    return Ok(received);
                }
            }
        };

        let (read, stored) = tokio::join!(reader, self.store.put(key, body, options, cancel));
        read?;
        Ok(stored?)
    }

    fn location(&self, key: &ObjectKey) -> String {
        let path = key
            .as_str()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.public_base_path.trim_end_matches('/'), path)
    }
}

fn malformed(err: MultipartError) -> GatewayError {
    UploadRejection::Malformed(err.body_text()).into()
}

/// Percent-decoded last segment of the client-supplied file name.
fn original_file_name(raw: &str) -> String {
    let decoded = urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    decoded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn check_extension(descriptor: &UploadDescriptor, filename: &str) -> Result<(), UploadRejection> {
    if descriptor.allowed_extensions.is_empty() {
        return Ok(());
    }
    let allowed: Vec<String> = descriptor
        .allowed_extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .collect();
    let extension = extension_of(filename).unwrap_or_default();
    if allowed.contains(&extension) {
        Ok(())
    } else {
        Err(UploadRejection::Extension {
            filename: filename.to_string(),
            extension,
            allowed: allowed.join(", "),
        })
    }
}

/// Compare top-level types only: `image/png` passes for `image` or `image/*`.
fn check_type(
    descriptor: &UploadDescriptor,
    filename: &str,
    content_type: &str,
) -> Result<(), UploadRejection> {
    if descriptor.allowed_types.is_empty() {
        return Ok(());
    }
    let top_level = |value: &str| {
        value
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    };
    let actual = top_level(content_type);
    let accepted = descriptor
        .allowed_types
        .iter()
        .any(|allowed| allowed.trim() == "*" || top_level(allowed.as_str()) == actual);
    if accepted {
        Ok(())
    } else {
        Err(UploadRejection::MimeType {
            filename: filename.to_string(),
            mime: content_type.to_string(),
            allowed: descriptor.allowed_types.join(", "),
        })
    }
}

/// Base64-encode non-ASCII values and flag them with `<name>-encoding`.
pub fn sanitize_metadata(metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut sanitized = BTreeMap::new();
    for (name, value) in metadata {
        if value.is_ascii() {
            sanitized.insert(name, value);
        } else {
            sanitized.insert(
                format!("{}{}", name, ENCODING_SUFFIX),
                BASE64_MARKER.to_string(),
            );
            sanitized.insert(name, general_purpose::STANDARD.encode(value.as_bytes()));
        }
    }
    sanitized
}

/// Reverse `sanitize_metadata`. Values that fail to decode are kept as-is.
pub fn decode_metadata(metadata: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let is_flagged = |name: &str| {
        metadata
            .get(&format!("{}{}", name, ENCODING_SUFFIX))
            .is_some_and(|marker| marker == BASE64_MARKER)
    };
    metadata
        .iter()
        .filter(|(name, value)| {
            !(value.as_str() == BASE64_MARKER
                && name
                    .strip_suffix(ENCODING_SUFFIX)
                    .is_some_and(|base| metadata.contains_key(base)))
        })
        .map(|(name, value)| {
            let value = if is_flagged(name) {
                general_purpose::STANDARD
                    .decode(value)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_else(|| value.clone())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::upload::{MaxSize, Resolver},
        services::memory_store::MemoryObjectStore,
    };
    use axum::{
        body::Body,
        extract::{FromRequest, Request},
        http::{HeaderValue, StatusCode, header},
    };

    const BOUNDARY: &str = "gateway-test-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a str, &'a [u8]),
    }

    async fn multipart(parts: &[Part<'_>]) -> Multipart {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, content_type, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            name, filename, content_type
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    fn directory_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-upload-directory", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn stores_under_the_header_directory() {
        let store = Arc::new(MemoryObjectStore::new());
        let pipeline = UploadPipeline::new(store.clone(), UploadDescriptor::single("file"), "/files");
        let body = multipart(&[Part::File("file", "c.txt", "text/plain", b"hello")]).await;

        let outcome = pipeline
            .ingest(&directory_header("/a/b/"), body, &CancellationToken::new())
            .await
            .unwrap();
        let record = &outcome.files[0];
        assert_eq!(record.key.as_str(), "a/b/c.txt");
        assert_eq!(record.location, "/files/a/b/c.txt");
        assert_eq!(record.size, 5);
        assert_eq!(record.content_type, "text/plain");

        let stored = store.object(&record.key).await.unwrap();
        assert_eq!(stored.metadata["originalname"], "c.txt");
        assert_eq!(stored.metadata["directory"], "a/b");
    }

    #[tokio::test]
    async fn directory_field_must_precede_files() {
        let pipeline = UploadPipeline::new(
            Arc::new(MemoryObjectStore::new()),
            UploadDescriptor::single("file"),
            "/files",
        );
        let before = multipart(&[
            Part::Text("directory", "docs"),
            Part::File("file", "a.txt", "text/plain", b"x"),
        ])
        .await;
        let outcome = pipeline
            .ingest(&HeaderMap::new(), before, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.files[0].key.as_str(), "docs/a.txt");
        assert_eq!(outcome.form["directory"], "docs");

        let after = multipart(&[
            Part::File("file", "a.txt", "text/plain", b"x"),
            Part::Text("directory", "docs"),
        ])
        .await;
        let err = pipeline
            .ingest(&HeaderMap::new(), after, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("x-upload-directory"));
    }

    #[tokio::test]
    async fn oversized_files_are_not_stored() {
        let store = Arc::new(MemoryObjectStore::new());
        let descriptor = UploadDescriptor::single("file").max_size(MaxSize::parse("1KB"));
        let pipeline = UploadPipeline::new(store.clone(), descriptor, "/files");
        let data = vec![b'x'; 4096];
        let body = multipart(&[Part::File("file", "big.bin", "application/octet-stream", &data)]).await;

        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn filters_name_the_failed_constraint() {
        let descriptor = UploadDescriptor::single("file")
            .allow_extensions([".PNG", "jpg"])
            .allow_types(["image/*"]);
        let pipeline = UploadPipeline::new(Arc::new(MemoryObjectStore::new()), descriptor, "/files");

        let body = multipart(&[Part::File("file", "notes.txt", "text/plain", b"x")]).await;
        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(err.to_string().contains("extension"));

        let body = multipart(&[Part::File("file", "fake.png", "text/plain", b"x")]).await;
        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("type `text/plain`"));

        let body = multipart(&[Part::File("file", "real.png", "image/png", b"x")]).await;
        assert!(
            pipeline
                .ingest(&directory_header("up"), body, &CancellationToken::new())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn single_mode_rejects_extra_and_foreign_fields() {
        let pipeline = UploadPipeline::new(
            Arc::new(MemoryObjectStore::new()),
            UploadDescriptor::single("file"),
            "/files",
        );
        let body = multipart(&[
            Part::File("file", "a.txt", "text/plain", b"a"),
            Part::File("file", "b.txt", "text/plain", b"b"),
        ])
        .await;
        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UploadRejected(UploadRejection::TooManyFiles { max: 1, .. })
        ));

        let body = multipart(&[Part::File("other", "a.txt", "text/plain", b"a")]).await;
        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UploadRejected(UploadRejection::UnexpectedField(_))
        ));
    }

    #[tokio::test]
    async fn multiple_mode_stops_past_max_count() {
        let store = Arc::new(MemoryObjectStore::new());
        let pipeline = UploadPipeline::new(
            store.clone(),
            UploadDescriptor::multiple("files", 2),
            "/files",
        );
        let body = multipart(&[
            Part::File("files", "a.txt", "text/plain", b"a"),
            Part::File("files", "b.txt", "text/plain", b"b"),
            Part::File("files", "c.txt", "text/plain", b"c"),
        ])
        .await;
        let err = pipeline
            .ingest(&directory_header("up"), body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UploadRejected(UploadRejection::TooManyFiles { max: 2, .. })
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(store.object(&ObjectKey::normalize("up/c.txt")).await.is_none());
    }

    #[tokio::test]
    async fn resolver_names_take_precedence() {
        let descriptor = UploadDescriptor::any()
            .fixed_filename("ignored.txt")
            .filename_resolver(Resolver::sync(|ctx: &UploadContext| {
                Ok(format!("{}-{}", ctx.field_name, ctx.original_name))
            }));
        let pipeline = UploadPipeline::new(Arc::new(MemoryObjectStore::new()), descriptor, "/files");
        let body = multipart(&[
            Part::File("avatar", "me%20now.png", "image/png", b"a"),
            Part::File("cover", "wide.png", "image/png", b"b"),
        ])
        .await;
        let outcome = pipeline
            .ingest(&directory_header("users/7"), body, &CancellationToken::new())
            .await
            .unwrap();
        let keys: Vec<_> = outcome.files.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["users/7/avatar-me now.png", "users/7/cover-wide.png"]);
        assert_eq!(outcome.files[0].location, "/files/users/7/avatar-me%20now.png");
    }

    #[test]
    fn non_ascii_metadata_round_trips() {
        let original = BTreeMap::from([
            ("originalname".to_string(), "résumé.pdf".to_string()),
            ("fieldname".to_string(), "file".to_string()),
        ]);
        let sanitized = sanitize_metadata(original.clone());
        assert!(sanitized.values().all(|value| value.is_ascii()));
        assert_eq!(sanitized["originalname-encoding"], "base64");
        assert_eq!(decode_metadata(&sanitized), original);
    }

    #[test]
    fn original_names_are_decoded_once_and_stripped_of_paths() {
        assert_eq!(original_file_name("C:\\tmp\\a%2520b.txt"), "a%20b.txt");
        assert_eq!(original_file_name("../../etc/passwd"), "passwd");
    }
}
