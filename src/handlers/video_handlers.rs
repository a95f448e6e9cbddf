//! Byte-range video streaming: `HEAD|GET /video/{*key}`.
//!
//! HEAD answers the player's probe from metadata alone. GET resolves the
//! `Range` header into a window of at most the configured chunk size,
//! serves it as 206 (or the whole object as 200 without a usable header)
//! and aborts the store read when the client leaves or the timeout fires.

use crate::{
    errors::{AppError, GatewayError},
    handlers::{echo_cors_origin, insert_header, key_param, set_validators},
    services::{
        cancellation::CancellationBridge,
        content::resolve_content_type,
        delivery::{DeliveryContext, streaming_body},
        range_resolver,
    },
    state::AppState,
};
use axum::{
    body::Body,
    extract::{RawPathParams, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// `HEAD /video/{*key}`
pub async fn probe_video(
    State(state): State<AppState>,
    params: RawPathParams,
    request_headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = key_param(&params)?;
    let meta = state.store.stat(&key).await?;

    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    insert_header(headers, header::CONTENT_TYPE, &resolve_content_type(&key, &meta));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, meta.size.into());
    set_validators(headers, &meta);
    echo_cors_origin(&request_headers, headers, &state.settings.allowed_origins);
    Ok(response)
}

/// `GET /video/{*key}`
pub async fn stream_video(
    State(state): State<AppState>,
    params: RawPathParams,
    request_headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = key_param(&params)?;
    let meta = state.store.stat(&key).await?;

    let range_header = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let range = match range_resolver::resolve(
        range_header,
        meta.size,
        state.settings.video_chunk_size,
    ) {
        Ok(range) => Some(range),
        Err(rejection) if rejection.falls_back_to_full() => None,
        Err(rejection) => {
            tracing::debug!(key = %key, range = ?range_header, "unsatisfiable range: {}", rejection);
            let mut response =
                AppError::from(GatewayError::RangeUnsatisfiable { size: meta.size }).into_response();
            insert_header(
                response.headers_mut(),
                header::CONTENT_RANGE,
                &format!("bytes */{}", meta.size),
            );
            return Ok(response);
        }
    };

    let bridge = CancellationBridge::new();
    bridge.arm_timeout(state.settings.video_timeout);
    let stream = state.store.get(&key, range, bridge.token()).await?;
    let body = streaming_body(bridge, stream, DeliveryContext::new(key.as_str(), range));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    insert_header(headers, header::CONTENT_TYPE, &resolve_content_type(&key, &meta));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    match range {
        Some(range) => {
            insert_header(headers, header::CONTENT_RANGE, &range.content_range(meta.size));
            headers.insert(header::CONTENT_LENGTH, range.len().into());
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        }
        None => {
            headers.insert(header::CONTENT_LENGTH, meta.size.into());
            *response.status_mut() = StatusCode::OK;
        }
    }
    let headers = response.headers_mut();
    set_validators(headers, &meta);
    echo_cors_origin(&request_headers, headers, &state.settings.allowed_origins);

    Ok(response)
}
