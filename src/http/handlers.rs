//! Axum HTTP handlers for the web server
//!
//! Provides the JSON-RPC endpoint and the public health endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::domain::CallerId;
use crate::errors::AppError;
use crate::mcp::rpc::{app_error_to_json_rpc, json_rpc_error, PARSE_ERROR};
use crate::mcp::server::RpcOutcome;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = state.dispatcher.service();
    Json(HealthResponse {
        status: "ok",
        service: service.name.clone(),
        version: service.version.clone(),
    })
}

pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

pub async fn rpc_endpoint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
            )
                .into_response()
        }
    };

    if let Value::Array(batch) = payload {
        if batch.is_empty() {
            let error = AppError::invalid_request("empty_batch", "batch must not be empty");
            return (StatusCode::BAD_REQUEST, Json(app_error_to_json_rpc(None, error)))
                .into_response();
        }

        let mut responses = Vec::with_capacity(batch.len());
        for item in batch {
            match state.dispatcher.handle(item, &caller).await {
                RpcOutcome::Reply(response) | RpcOutcome::Rejected(response) => {
                    responses.push(response)
                }
                RpcOutcome::Accepted => {}
            }
        }

        if responses.is_empty() {
            return StatusCode::NO_CONTENT.into_response();
        }

        return (StatusCode::OK, Json(Value::Array(responses))).into_response();
    }

    match state.dispatcher.handle(payload, &caller).await {
        RpcOutcome::Reply(response) => (StatusCode::OK, Json(response)).into_response(),
        RpcOutcome::Rejected(response) => (StatusCode::BAD_REQUEST, Json(response)).into_response(),
        RpcOutcome::Accepted => StatusCode::NO_CONTENT.into_response(),
    }
}
