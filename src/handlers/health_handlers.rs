//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that asks the object store to check itself

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe: always 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs the store's `health_check` (for the SQLite backend: `SELECT 1` and
/// a disk write/read/delete). HTTP 200 when it passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.store.health_check().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            CheckStatus {
                ok: false,
                error: Some(e.to_string()),
            }
        }
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
