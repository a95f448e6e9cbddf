//! Single-file delivery: `GET /files/{*key}`.

use crate::{
    errors::AppError,
    handlers::{insert_header, key_param, set_validators},
    services::{
        cancellation::CancellationBridge,
        content::{
            cache_control, content_disposition, disposition_for, parse_max_age,
            resolve_content_type, with_charset,
        },
        delivery::{DeliveryContext, streaming_body},
    },
    state::AppState,
};
use axum::{
    extract::{Query, RawPathParams, State},
    http::{StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    /// Force `Content-Disposition: attachment`.
    pub download: Option<bool>,
    /// `true`, a second count, or a duration such as `1h`.
    pub cache: Option<String>,
}

impl FileQuery {
    fn max_age(&self, default: Duration) -> Result<Option<Duration>, AppError> {
        let Some(raw) = self.cache.as_deref().map(str::trim) else {
            return Ok(None);
        };
        match raw {
            "" | "false" => Ok(None),
            "true" => Ok(Some(default)),
            value => parse_max_age(value)
                .map(Some)
                .ok_or_else(|| AppError::bad_request(format!("invalid cache max-age `{}`", value))),
        }
    }
}

/// Stream one object with its content type, disposition and caching headers.
pub async fn get_file(
    State(state): State<AppState>,
    params: RawPathParams,
    Query(query): Query<FileQuery>,
) -> Result<Response, AppError> {
    let key = key_param(&params)?;
    let max_age = query.max_age(state.settings.default_cache_max_age)?;

    let bridge = CancellationBridge::new();
    let meta = state.store.stat(&key).await?;
    let stream = state.store.get(&key, None, bridge.token()).await?;

    let content_type = with_charset(&resolve_content_type(&key, &meta));
    let disposition = disposition_for(&key, query.download.unwrap_or(false));
    let body = streaming_body(bridge, stream, DeliveryContext::new(key.as_str(), None));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    insert_header(headers, header::CONTENT_TYPE, &content_type);
    headers.insert(header::CONTENT_LENGTH, meta.size.into());
    insert_header(
        headers,
        header::CONTENT_DISPOSITION,
        &content_disposition(disposition, key.file_name()),
    );
    if let Some(max_age) = max_age {
        insert_header(headers, header::CACHE_CONTROL, &cache_control(max_age));
    }
    set_validators(headers, &meta);

    Ok(response)
}
