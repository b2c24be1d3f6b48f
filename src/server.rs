//! HTTP surface of the remote event store.
//!
//! Every `/v1` route carries the namespace key as a path segment and
//! the proof token in the `x-proof-token` header; the pair is checked
//! against the store's binding before any event data is touched.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{
    AppendResponse, DeleteResponse, ErrorResponse, EventsResponse, HealthResponse, PatchRequest,
    PatchResponse,
};
use crate::event::PlayEvent;
use crate::namespace::PROOF_HEADER;
use crate::store::{EventStore, TokenStatus};

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(store: Arc<EventStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/{namespace}/events",
            post(append_events).get(query_events).delete(delete_events),
        )
        .route("/v1/{namespace}/events/metadata", patch(patch_metadata))
        .with_state(store)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> ApiError {
    tracing::error!("Store operation failed: {e:#}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Check the proof token before touching event storage. Writes to a
/// fresh namespace bind the presented token (first come, and only
/// holders of the secret can derive the key to come first with).
fn authorize(
    store: &EventStore,
    namespace: &str,
    headers: &HeaderMap,
    bind_on_first_use: bool,
) -> Result<(), ApiError> {
    let token = headers
        .get(PROOF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token.is_empty() {
        return Err(api_error(StatusCode::UNAUTHORIZED, "missing proof token"));
    }
    match store
        .token_status(namespace, token)
        .map_err(internal_error)?
    {
        TokenStatus::Valid => Ok(()),
        TokenStatus::Mismatch => {
            tracing::warn!("Proof token mismatch for namespace {namespace}");
            Err(api_error(StatusCode::FORBIDDEN, "proof token mismatch"))
        }
        TokenStatus::Unregistered => {
            if bind_on_first_use {
                store
                    .register_token(namespace, token)
                    .map_err(internal_error)?;
            }
            Ok(())
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn append_events(
    State(store): State<Arc<EventStore>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Vec<Value>>,
) -> Result<Json<AppendResponse>, ApiError> {
    authorize(&store, &namespace, &headers, true)?;

    if body.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "empty event batch"));
    }

    // per-record tolerance: entries that don't even decode count as
    // skipped, the rest of the batch still lands
    let mut events = Vec::new();
    let mut undecodable = 0;
    for value in body {
        match serde_json::from_value::<PlayEvent>(value) {
            Ok(event) => events.push(event),
            Err(_) => undecodable += 1,
        }
    }

    let (accepted, skipped) = store.append(&namespace, &events).map_err(internal_error)?;
    if accepted == 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "no valid events in batch",
        ));
    }
    Ok(Json(AppendResponse {
        accepted,
        skipped: skipped + undecodable,
    }))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
}

async fn query_events(
    State(store): State<Arc<EventStore>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<EventsResponse>, ApiError> {
    authorize(&store, &namespace, &headers, false)?;

    let from = parse_bound(params.from.as_deref(), "from")?;
    let to = parse_bound(params.to.as_deref(), "to")?;

    let events = store
        .query_range(&namespace, from, to)
        .map_err(internal_error)?;
    Ok(Json(EventsResponse { events }))
}

fn parse_bound(value: Option<&str>, name: &str) -> Result<i64, ApiError> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("missing or invalid '{name}' parameter"),
            )
        })
}

async fn patch_metadata(
    State(store): State<Arc<EventStore>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<PatchResponse>, ApiError> {
    authorize(&store, &namespace, &headers, false)?;

    let request: PatchRequest = serde_json::from_value(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid patch request: {e}")))?;

    let patched = store
        .patch_metadata(
            &namespace,
            request.target_kind,
            &request.target_id,
            &request.fields,
        )
        .map_err(internal_error)?;
    Ok(Json(PatchResponse { patched }))
}

async fn delete_events(
    State(store): State<Arc<EventStore>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteResponse>, ApiError> {
    authorize(&store, &namespace, &headers, false)?;

    let deleted = store.delete_all(&namespace).map_err(internal_error)?;
    Ok(Json(DeleteResponse { deleted }))
}
