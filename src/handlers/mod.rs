//! HTTP handlers and the header helpers they share.

pub mod archive_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod upload_handlers;
pub mod video_handlers;

use crate::{errors::AppError, models::key::ObjectKey, models::object::ObjectMetadata};
use axum::{
    extract::RawPathParams,
    http::{HeaderMap, HeaderName, HeaderValue, header},
};

/// The `{*key}` path segment, still percent-encoded, normalized once.
pub(crate) fn key_param(params: &RawPathParams) -> Result<ObjectKey, AppError> {
    let raw = params
        .iter()
        .find(|(name, _)| *name == "key")
        .map(|(_, value)| value)
        .unwrap_or_default();
    let key = ObjectKey::normalize(raw);
    if key.is_empty() {
        return Err(AppError::bad_request("an object key is required"));
    }
    Ok(key)
}

/// Insert a header, skipping values that are not valid header text.
pub(crate) fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!("dropping invalid `{}` header value {:?}", name, value),
    }
}

/// Copy `ETag` and `Last-Modified` when the store reported them.
pub(crate) fn set_validators(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    if let Some(etag) = meta.etag.as_deref() {
        insert_header(headers, header::ETAG, &format!("\"{}\"", etag.trim_matches('"')));
    }
    if let Some(modified) = meta.last_modified {
        insert_header(
            headers,
            header::LAST_MODIFIED,
            &modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }
}

/// Echo the request's `Origin` when it is allowed (`*` allows any).
pub(crate) fn echo_cors_origin(request: &HeaderMap, response: &mut HeaderMap, allowed: &[String]) {
    let Some(origin) = request.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if allowed.iter().any(|entry| entry == "*" || entry == origin) {
        insert_header(response, header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        response.append(header::VARY, HeaderValue::from_static("origin"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn validators_use_http_dates() {
        let meta = ObjectMetadata {
            size: 1,
            content_type: None,
            etag: Some("abc".into()),
            last_modified: Some(Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()),
        };
        let mut headers = HeaderMap::new();
        set_validators(&mut headers, &meta);
        assert_eq!(headers[header::ETAG], "\"abc\"");
        assert_eq!(headers[header::LAST_MODIFIED], "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn cors_echoes_only_allowed_origins() {
        let allowed = vec!["https://app.example".to_string()];
        let mut request = HeaderMap::new();
        request.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example"));
        let mut response = HeaderMap::new();
        echo_cors_origin(&request, &mut response, &allowed);
        assert!(response.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        request.insert(header::ORIGIN, HeaderValue::from_static("https://app.example"));
        echo_cors_origin(&request, &mut response, &allowed);
        assert_eq!(
            response[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
        assert_eq!(response[header::VARY], "origin");
    }
}
