//! Upload middleware and the handlers behind it.
//!
//! The middleware consumes the multipart body, stores the files, and hands
//! the downstream handler an empty body plus `UploadedFiles` and
//! `UploadForm` request extensions.

use crate::{
    errors::AppError,
    models::upload::{UploadForm, UploadedFiles},
    services::{cancellation::CancellationBridge, upload_pipeline::UploadPipeline},
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{FromRequest, Multipart, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

pub async fn upload_middleware(
    State(pipeline): State<Arc<UploadPipeline>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();

    // The extractor needs the content type and the body limit extension.
    let mut multipart_request = Request::new(body);
    *multipart_request.headers_mut() = parts.headers.clone();
    *multipart_request.extensions_mut() = parts.extensions.clone();
    let multipart = Multipart::from_request(multipart_request, &())
        .await
        .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;

    let bridge = CancellationBridge::new();
    let outcome = pipeline
        .ingest(&parts.headers, multipart, bridge.token())
        .await?;
    tracing::info!(
        files = outcome.files.len(),
        fields = outcome.form.len(),
        "upload accepted"
    );

    parts.extensions.insert(UploadedFiles(outcome.files));
    parts.extensions.insert(UploadForm(outcome.form));
    Ok(next.run(Request::from_parts(parts, Body::empty())).await)
}

/// `POST /upload/single`: the stored record.
pub async fn single_uploaded(
    Extension(UploadedFiles(files)): Extension<UploadedFiles>,
) -> Result<Response, AppError> {
    let record = files
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("upload middleware produced no record"))?;
    Ok(Json(record).into_response())
}

/// `POST /upload/multiple` and `/upload/any`: every stored record plus the
/// text fields that came with them.
pub async fn files_uploaded(
    Extension(UploadedFiles(files)): Extension<UploadedFiles>,
    Extension(UploadForm(fields)): Extension<UploadForm>,
) -> impl IntoResponse {
    Json(json!({ "files": files, "fields": fields }))
}
