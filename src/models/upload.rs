//! Upload route configuration and the records produced for stored files.

use crate::models::{key::ObjectKey, object::Acl};
use futures::future::BoxFuture;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

/// Which multipart file fields a route accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadMode {
    /// Exactly one file, in `field_name`.
    Single,
    /// Up to `max_count` files, all in `field_name`.
    Multiple { max_count: usize },
    /// Files in any field.
    Any,
}

/// Where the target directory is read from: a request header first, then a
/// text field sent before the file parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectorySource {
    pub header: String,
    pub field: String,
}

impl Default for DirectorySource {
    fn default() -> Self {
        Self {
            header: "x-upload-directory".into(),
            field: "directory".into(),
        }
    }
}

/// Maximum accepted size of a single uploaded file; `None` is unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaxSize(Option<u64>);

impl MaxSize {
    pub fn unlimited() -> Self {
        Self(None)
    }

    pub fn bytes(limit: u64) -> Self {
        Self(Some(limit))
    }

    /// Parse `"1048576"`, `"512KB"`, `"10GB"`, `"1.5 mb"` (1024-based).
    ///
    /// Values that cannot be parsed mean "no limit" and are logged.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::unlimited();
        }
        match parse_byte_size(value) {
            Some(limit) => Self::bytes(limit),
            None => {
                tracing::warn!("ignoring unparsable max upload size `{}`", value);
                Self::unlimited()
            }
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.0
    }
}

fn parse_byte_size(value: &str) -> Option<u64> {
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return None,
    };
    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes as u64)
}

impl From<u64> for MaxSize {
    fn from(limit: u64) -> Self {
        Self::bytes(limit)
    }
}

/// What resolvers get to look at for each uploaded file.
#[derive(Clone, Debug)]
pub struct UploadContext {
    pub field_name: String,
    /// Original file name, percent-decoded.
    pub original_name: String,
    pub content_type: String,
    pub directory: ObjectKey,
    /// Text fields received before this file.
    pub form: BTreeMap<String, String>,
}

/// A caller-supplied function computing a value per uploaded file, either
/// synchronously or asynchronously.
pub enum Resolver<T> {
    Sync(Arc<dyn Fn(&UploadContext) -> anyhow::Result<T> + Send + Sync>),
    Async(Arc<dyn Fn(UploadContext) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>),
}

impl<T> Resolver<T> {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&UploadContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Resolver::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(UploadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Resolver::Async(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub async fn resolve(&self, ctx: &UploadContext) -> anyhow::Result<T> {
        match self {
            Resolver::Sync(f) => f(ctx),
            Resolver::Async(f) => f(ctx.clone()).await,
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        match self {
            Resolver::Sync(f) => Resolver::Sync(f.clone()),
            Resolver::Async(f) => Resolver::Async(f.clone()),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Sync(_) => f.write_str("Resolver::Sync"),
            Resolver::Async(_) => f.write_str("Resolver::Async"),
        }
    }
}

/// Caller-supplied metadata merged over the base attributes.
#[derive(Clone, Debug, Default)]
pub enum MetadataSource {
    #[default]
    None,
    Static(BTreeMap<String, String>),
    Resolver(Resolver<BTreeMap<String, String>>),
}

/// Configuration of one upload route. Built once at route registration and
/// shared read-only by every request.
#[derive(Clone, Debug)]
pub struct UploadDescriptor {
    pub field_name: String,
    pub mode: UploadMode,
    pub directory: DirectorySource,
    pub acl: Acl,
    pub max_size: MaxSize,
    /// Top-level MIME types (`image`, `video/*`, ...); empty accepts all.
    pub allowed_types: Vec<String>,
    /// Extensions with or without the dot; empty accepts all.
    pub allowed_extensions: Vec<String>,
    /// Takes precedence over `fixed_filename` and the original name.
    pub filename_resolver: Option<Resolver<String>>,
    pub fixed_filename: Option<String>,
    pub metadata: MetadataSource,
}

impl UploadDescriptor {
    pub fn new(field_name: impl Into<String>, mode: UploadMode) -> Self {
        Self {
            field_name: field_name.into(),
            mode,
            directory: DirectorySource::default(),
            acl: Acl::default(),
            max_size: MaxSize::unlimited(),
            allowed_types: Vec::new(),
            allowed_extensions: Vec::new(),
            filename_resolver: None,
            fixed_filename: None,
            metadata: MetadataSource::None,
        }
    }

    pub fn single(field_name: impl Into<String>) -> Self {
        Self::new(field_name, UploadMode::Single)
    }

    pub fn multiple(field_name: impl Into<String>, max_count: usize) -> Self {
        Self::new(field_name, UploadMode::Multiple { max_count })
    }

    pub fn any() -> Self {
        Self::new("", UploadMode::Any)
    }

    pub fn max_size(mut self, max_size: MaxSize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    pub fn allow_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn filename_resolver(mut self, resolver: Resolver<String>) -> Self {
        self.filename_resolver = Some(resolver);
        self
    }

    pub fn fixed_filename(mut self, name: impl Into<String>) -> Self {
        self.fixed_filename = Some(name.into());
        self
    }

    pub fn metadata(mut self, metadata: MetadataSource) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One stored file, handed to the downstream handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadedObjectRecord {
    pub key: ObjectKey,
    pub location: String,
    pub etag: String,
    pub size: u64,
    pub content_type: String,
}

/// Request extension carrying every record stored by the upload middleware.
#[derive(Clone, Debug, Default)]
pub struct UploadedFiles(pub Vec<UploadedObjectRecord>);

/// Request extension carrying the non-file form fields.
#[derive(Clone, Debug, Default)]
pub struct UploadForm(pub BTreeMap<String, String>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_sizes() {
        assert_eq!(MaxSize::parse("1MB").limit(), Some(1 << 20));
        assert_eq!(MaxSize::parse("10GB").limit(), Some(10 << 30));
        assert_eq!(MaxSize::parse("512 kb").limit(), Some(512 << 10));
        assert_eq!(MaxSize::parse("1.5MB").limit(), Some(1_572_864));
        assert_eq!(MaxSize::parse("2048").limit(), Some(2048));
    }

    #[test]
    fn unparsable_sizes_mean_no_limit() {
        assert_eq!(MaxSize::parse("lots").limit(), None);
        assert_eq!(MaxSize::parse("10XB").limit(), None);
        assert_eq!(MaxSize::parse("").limit(), None);
    }

    #[tokio::test]
    async fn resolvers_run_sync_and_async() {
        let ctx = UploadContext {
            field_name: "file".into(),
            original_name: "a.txt".into(),
            content_type: "text/plain".into(),
            directory: ObjectKey::normalize("docs"),
            form: BTreeMap::new(),
        };
        let sync = Resolver::sync(|ctx: &UploadContext| Ok(format!("sync-{}", ctx.original_name)));
        let from_async = Resolver::from_async(|ctx: UploadContext| async move {
            Ok(format!("async-{}", ctx.original_name))
        });
        assert_eq!(sync.resolve(&ctx).await.unwrap(), "sync-a.txt");
        assert_eq!(from_async.resolve(&ctx).await.unwrap(), "async-a.txt");
    }
}
