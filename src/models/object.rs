//! Represents an object (file) stored behind the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// Read-only snapshot of an object's attributes.
///
/// Fetched once per request and never cached: the object may change between
/// the `stat` and the subsequent `get`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Metadata row persisted by the SQLite-backed store.
///
/// The struct stores the attributes of an object, not its content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRow {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Normalized object key.
    pub key: String,

    /// Last segment of the key.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: Option<String>,

    /// Canned ACL the object was stored with.
    pub acl: String,

    /// User metadata as a JSON object of string values.
    pub metadata: String,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,
}

impl From<&ObjectRow> for ObjectMetadata {
    fn from(row: &ObjectRow) -> Self {
        Self {
            size: row.size_bytes.max(0) as u64,
            content_type: row.content_type.clone(),
            etag: row.etag.clone(),
            last_modified: Some(row.last_modified),
        }
    }
}

/// Canned access control applied when an object is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AuthenticatedRead => "authenticated-read",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Acl {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "private" => Ok(Acl::Private),
            "public-read" => Ok(Acl::PublicRead),
            "public-read-write" => Ok(Acl::PublicReadWrite),
            "authenticated-read" => Ok(Acl::AuthenticatedRead),
            other => Err(format!("unknown acl `{}`", other)),
        }
    }
}

/// Attributes supplied alongside a `put`.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub acl: Acl,
}

/// Result of a successful `put`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOutcome {
    pub etag: String,
    pub size: u64,
}
