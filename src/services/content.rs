//! Content-type, disposition and caching decisions for delivered objects.

use crate::models::{key::ObjectKey, object::ObjectMetadata};
use std::time::Duration;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extensions browsers can render themselves; everything else downloads.
#[rustfmt::skip]
const INLINE_EXTENSIONS: &[&str] = &[
    "pdf",
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "ico", "avif",
    "mp3", "wav", "ogg", "oga", "m4a", "aac", "flac", "opus",
    "mp4", "webm", "ogv", "mov", "m4v",
    "txt", "md", "csv", "tsv", "log", "html", "htm", "css", "js", "mjs", "json", "xml",
    "yaml", "yml", "toml", "ini", "rs", "py", "ts", "go", "java", "c", "h", "cpp", "sh", "sql",
];

const TEXT_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/xhtml+xml",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// Stored content type, else a guess from the key's extension.
pub fn resolve_content_type(key: &ObjectKey, meta: &ObjectMetadata) -> String {
    meta.content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| guess_content_type(key.file_name()))
}

pub fn guess_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// `text/*` and the textual `application/*` types.
pub fn is_text_like(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || TEXT_APPLICATION_TYPES.contains(&essence.as_str())
}

/// Add `charset=utf-8` to text-like types that do not declare one.
pub fn with_charset(content_type: &str) -> String {
    if is_text_like(content_type) && !content_type.to_ascii_lowercase().contains("charset=") {
        format!("{}; charset=utf-8", content_type)
    } else {
        content_type.to_string()
    }
}

pub fn disposition_for(key: &ObjectKey, force_download: bool) -> Disposition {
    let inline = key
        .extension()
        .map(|ext| INLINE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);
    if inline && !force_download {
        Disposition::Inline
    } else {
        Disposition::Attachment
    }
}

/// `Content-Disposition` value with a percent-encoded file name.
pub fn content_disposition(disposition: Disposition, filename: &str) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let encoded = urlencoding::encode(filename);
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind, encoded, encoded
    )
}

/// Parse a max-age given as seconds (`"3600"`) or a duration (`"1h"`).
pub fn parse_max_age(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).ok()
}

pub fn cache_control(max_age: Duration) -> String {
    format!("public, max-age={}", max_age.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content_type: Option<&str>) -> ObjectMetadata {
        ObjectMetadata {
            size: 1,
            content_type: content_type.map(str::to_string),
            etag: None,
            last_modified: None,
        }
    }

    #[test]
    fn content_type_prefers_stored_metadata() {
        let key = ObjectKey::normalize("a/report.pdf");
        assert_eq!(
            resolve_content_type(&key, &meta(Some("application/x-custom"))),
            "application/x-custom"
        );
        assert_eq!(resolve_content_type(&key, &meta(None)), "application/pdf");
        let unknown = ObjectKey::normalize("blob.zzzunknown");
        assert_eq!(resolve_content_type(&unknown, &meta(None)), OCTET_STREAM);
    }

    #[test]
    fn text_like_types_get_a_charset() {
        assert_eq!(with_charset("text/plain"), "text/plain; charset=utf-8");
        assert_eq!(
            with_charset("application/json"),
            "application/json; charset=utf-8"
        );
        assert_eq!(
            with_charset("text/html; charset=iso-8859-1"),
            "text/html; charset=iso-8859-1"
        );
        assert_eq!(with_charset("image/png"), "image/png");
    }

    #[test]
    fn disposition_follows_allow_list_and_force_flag() {
        let pdf = ObjectKey::normalize("docs/Guide.PDF");
        let exe = ObjectKey::normalize("bin/setup.exe");
        assert_eq!(disposition_for(&pdf, false), Disposition::Inline);
        assert_eq!(disposition_for(&pdf, true), Disposition::Attachment);
        assert_eq!(disposition_for(&exe, false), Disposition::Attachment);
    }

    #[test]
    fn disposition_header_encodes_the_name() {
        assert_eq!(
            content_disposition(Disposition::Attachment, "my report é.pdf"),
            "attachment; filename=\"my%20report%20%C3%A9.pdf\"; filename*=UTF-8''my%20report%20%C3%A9.pdf"
        );
    }

    #[test]
    fn max_age_accepts_seconds_and_durations() {
        assert_eq!(parse_max_age("3600"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_max_age("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_max_age("2days"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_max_age("soon"), None);
    }
}
