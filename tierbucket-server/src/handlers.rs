use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tierbucket::Decision;

#[derive(Debug, Serialize)]
pub struct BucketStats {
    pub key: String,
    pub tokens: u32,
}

/// `POST /requests`: take one token for the caller named in the body.
pub async fn submit_request(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let key = match body.get(state.key_field.as_ref()).and_then(Value::as_str) {
        Some(key) if !key.is_empty() => key,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("missing string field `{}`", state.key_field) })),
            )
                .into_response()
        }
    };

    let report = state.limiter.decide(key, &state.bucket).await;
    match report.decision {
        Decision::Allowed { remaining } => {
            (StatusCode::CREATED, Json(json!({ "key": key, "remaining": remaining })))
                .into_response()
        }
        Decision::Denied { retry_after } => {
            let secs = retry_after_secs(retry_after);
            tracing::debug!(key, retry_after_secs = secs, "request throttled");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(json!({ "error": "rate limited", "retryAfterSecs": secs })),
            )
                .into_response()
        }
    }
}

/// `GET /buckets/{key}/stats`: tokens left, without taking one.
pub async fn bucket_stats(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.limiter.stats(&key, &state.bucket).await {
        Ok(tokens) => Json(BucketStats { key, tokens }).into_response(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to read bucket stats");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
                .into_response()
        }
    }
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}
