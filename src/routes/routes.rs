//! Defines the gateway's HTTP surface.
//!
//! ## Structure
//! - **Delivery endpoints**
//!   - `GET       /files/{*key}`: single file, inline or attachment
//!   - `HEAD|GET  /video/{*key}`: byte-range video streaming
//!   - `GET|POST  /archive`: zip of several objects
//!
//! - **Upload endpoints** (multipart, directory from `x-upload-directory`)
//!   - `POST /upload/single`: one file in field `file`
//!   - `POST /upload/multiple`: up to 10 files in field `files`
//!   - `POST /upload/any`: files in any field
//!
//! The wildcard `*key` allows nested keys like `videos/2025/intro.mp4`.

use crate::{
    handlers::{
        archive_handlers::{archive_from_body, archive_from_query},
        file_handlers::get_file,
        health_handlers::{healthz, readyz},
        upload_handlers::{files_uploaded, single_uploaded, upload_middleware},
        video_handlers::{probe_video, stream_video},
    },
    models::upload::UploadDescriptor,
    services::upload_pipeline::UploadPipeline,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    middleware::from_fn_with_state,
    routing::{MethodRouter, get, post},
};
use std::{convert::Infallible, sync::Arc};

const MAX_MULTIPLE_FILES: usize = 10;

/// Build the router with every gateway route.
pub fn routes(state: AppState) -> Router {
    let limit = state.settings.upload_max_size;

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // delivery
        .route("/files/{*key}", get(get_file))
        .route("/video/{*key}", get(stream_video).head(probe_video))
        .route("/archive", get(archive_from_query).post(archive_from_body))
        // uploads
        .route(
            "/upload/single",
            upload_route(
                &state,
                UploadDescriptor::single("file").max_size(limit),
                single_uploaded,
            ),
        )
        .route(
            "/upload/multiple",
            upload_route(
                &state,
                UploadDescriptor::multiple("files", MAX_MULTIPLE_FILES).max_size(limit),
                files_uploaded,
            ),
        )
        .route(
            "/upload/any",
            upload_route(&state, UploadDescriptor::any().max_size(limit), files_uploaded),
        )
        .with_state(state)
}

/// `POST` route whose multipart body is ingested per `descriptor` before
/// `handler` runs.
pub fn upload_route<H, T>(
    state: &AppState,
    descriptor: UploadDescriptor,
    handler: H,
) -> MethodRouter<AppState>
where
    H: Handler<T, AppState>,
    T: 'static,
{
    let pipeline = Arc::new(UploadPipeline::new(
        state.store.clone(),
        descriptor,
        state.settings.public_base_path.clone(),
    ));
    post(handler)
        .layer::<_, Infallible>(from_fn_with_state(pipeline, upload_middleware))
        .layer(DefaultBodyLimit::disable())
}
