use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::mcp::rpc::app_error_to_json_rpc;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {message}")]
    InvalidRequest {
        code: &'static str,
        message: String,
    },
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("unknown tool: {name}")]
    ToolNotFound { name: String },
    #[error("invalid params: {message}")]
    InvalidParams {
        code: &'static str,
        message: String,
    },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn invalid_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    pub fn invalid_params(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidParams { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::MethodNotFound { .. } | Self::ToolNotFound { .. } => StatusCode::OK,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Transport-level failures (raised before a request reaches the dispatcher)
/// are still answered with a JSON-RPC error envelope carrying a `null` id.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal { message } = &self {
            tracing::error!(error = %message, "request failed with internal error");
        }

        let status = self.status_code();
        (status, Json(app_error_to_json_rpc(None, self))).into_response()
    }
}
