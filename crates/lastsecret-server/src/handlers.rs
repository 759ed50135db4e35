use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{error::StoreError, store::ids, AppState};

/// TTL applied when the create request leaves `ttl_seconds` out.
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub secret: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_SECONDS
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
    pub url: String,
    pub ttl_seconds: i64,
    /// Unix milliseconds.
    pub expires_at: i64,
}

/// Path the client turns into the shareable link.
pub fn reveal_path(id: &str) -> String {
    format!("/s/{id}/reveal")
}

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };

    match state.store.put(&body.secret, body.ttl_seconds) {
        Ok(receipt) => {
            info!(
                ttl_seconds = body.ttl_seconds,
                bytes = body.secret.len(),
                "audit: secret.create"
            );
            let url = reveal_path(&receipt.id);
            (
                StatusCode::CREATED,
                Json(CreateResponse {
                    id: receipt.id,
                    url,
                    ttl_seconds: body.ttl_seconds,
                    expires_at: receipt.expires_at,
                }),
            )
                .into_response()
        }
        Err(e) if e.is_client_error() => bad_request(&e.to_string()),
        Err(e) => store_error(e),
    }
}

// ── Reveal ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub secret: String,
}

pub async fn reveal_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if !ids::is_well_formed(&id) {
        return bad_request("malformed secret id");
    }

    match state.reveals.reveal(&id) {
        Ok(secret) => {
            info!("audit: secret.reveal");
            Json(RevealResponse { secret }).into_response()
        }
        Err(StoreError::NotFound) => {
            debug!("audit: secret.reveal.not_found");
            not_found()
        }
        Err(e) => store_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": StoreError::NotFound.to_string()})),
    )
        .into_response()
}

fn store_error(e: StoreError) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
