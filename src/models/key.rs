//! Normalized object keys.
//!
//! Every controller consumes `ObjectKey` values only. Raw input (path
//! segments, query values, headers, JSON bodies) is handed over still
//! percent-encoded and decoded exactly once here.

use serde::Serialize;
use std::fmt;

/// A slash-delimited object key without leading, trailing or duplicate slashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Percent-decode `raw` once and collapse it into canonical form.
    ///
    /// Empty segments and `.` segments are dropped, so `"/a//b/./c/"`
    /// becomes `"a/b/c"`. The result may be empty (e.g. for `"/"`); callers
    /// that need an addressable object check [`ObjectKey::is_empty`].
    pub fn normalize(raw: &str) -> Self {
        let decoded = urlencoding::decode(raw)
            .map(|cow| cow.into_owned())
            .unwrap_or_else(|_| raw.to_string());

        let joined = decoded
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/");

        Self(joined)
    }

    /// Append a file name below this key (used as a directory).
    ///
    /// The name is taken as-is (it is not decoded again); separators inside
    /// it are collapsed the same way `normalize` does.
    pub fn join(&self, name: &str) -> Self {
        let tail = name
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".");
        let joined = if self.0.is_empty() {
            tail.collect::<Vec<_>>().join("/")
        } else {
            std::iter::once(self.0.as_str())
                .chain(tail)
                .collect::<Vec<_>>()
                .join("/")
        };
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last path segment, used as the default display/download name.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Lowercased extension of the last segment, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(self.file_name())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercased extension of a file name (`"Clip.MP4"` -> `"mp4"`).
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
