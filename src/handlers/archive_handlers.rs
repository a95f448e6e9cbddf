//! Zip downloads: `GET /archive?key=..&key=..&name=..` and `POST /archive`.

use crate::{
    errors::AppError,
    handlers::insert_header,
    models::archive::{ArchiveManifest, ArchiveRequest, archive_file_name},
    services::{
        archive_service::ArchiveService,
        cancellation::CancellationBridge,
        content::{Disposition, content_disposition},
        delivery::{DeliveryContext, streaming_body},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{RawQuery, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};

const KEY_PARAMS: &[&str] = &["key", "keys", "key[]", "keys[]"];

/// Keys from repeated `key` parameters. Values stay percent-encoded so the
/// manifest decodes them exactly once.
pub async fn archive_from_query(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let (keys, name) = parse_archive_query(query.as_deref().unwrap_or_default());
    let manifest = ArchiveManifest::build(keys.into_iter().map(|key| (key, None)))?;
    deliver_archive(&state, manifest, name.as_deref()).await
}

pub async fn archive_from_body(
    State(state): State<AppState>,
    Json(request): Json<ArchiveRequest>,
) -> Result<Response, AppError> {
    let manifest = ArchiveManifest::build(request.files.into_iter().map(|file| file.into_pair()))?;
    deliver_archive(&state, manifest, request.name.as_deref()).await
}

/// Fetch and measure, then answer with the exact length and stream the
/// second packaging pass.
async fn deliver_archive(
    state: &AppState,
    manifest: ArchiveManifest,
    name: Option<&str>,
) -> Result<Response, AppError> {
    let filename = archive_file_name(name);
    let service = ArchiveService::new(
        state.store.clone(),
        state.settings.archive_compression_level,
        state.settings.archive_fetch_concurrency,
    );

    let bridge = CancellationBridge::new();
    let prepared = service.prepare(&manifest, bridge.token()).await?;
    tracing::info!(
        archive = %filename,
        requested = manifest.entry_count(),
        included = prepared.entry_count(),
        content_length = prepared.content_length,
        "streaming archive"
    );
    let content_length = prepared.content_length;
    let body = streaming_body(
        bridge,
        prepared.into_stream(),
        DeliveryContext::new(filename.as_str(), None),
    );

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_LENGTH, content_length.into());
    insert_header(
        headers,
        header::CONTENT_DISPOSITION,
        &content_disposition(Disposition::Attachment, &filename),
    );
    Ok(response)
}

/// Split a raw query into (still encoded) keys and the decoded archive name.
fn parse_archive_query(query: &str) -> (Vec<String>, Option<String>) {
    let mut keys = Vec::new();
    let mut name = None;
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_param, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let param = decode_form(raw_param);
        // `+` is a form-encoded space; turn it into `%20` so the single
        // decode in key normalization sees it.
        let value = raw_value.replace('+', "%20");
        if KEY_PARAMS.contains(&param.as_str()) {
            keys.push(value);
        } else if param == "name" {
            name = Some(decode_form(raw_value));
        }
    }
    (keys, name)
}

fn decode_form(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|cow| cow.into_owned())
        .unwrap_or(spaced)
}
