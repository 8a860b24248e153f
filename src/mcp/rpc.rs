//! JSON-RPC protocol representations and formatting utilities
//!
//! Provides standardized mapping of internal AppErrors to valid JSON-RPC payloads.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const UNAUTHORIZED: i32 = -32001;

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::InvalidRequest { code, message } => json_rpc_error_with_data(
            id,
            INVALID_REQUEST,
            "Invalid Request",
            Some(error_data(code, &message, json!({}))),
        ),
        AppError::MethodNotFound { method } => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(error_data(
                "method_not_found",
                "unknown method name",
                json!({ "method": method }),
            )),
        ),
        AppError::ToolNotFound { name } => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(error_data(
                "tool_not_found",
                "unknown tool name",
                json!({ "name": name }),
            )),
        ),
        AppError::InvalidParams { code, message } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(error_data(code, &message, json!({}))),
        ),
        AppError::Unauthorized { code, message } => json_rpc_error_with_data(
            id,
            UNAUTHORIZED,
            "Unauthorized",
            Some(error_data(code, message, json!({}))),
        ),
        AppError::Internal { message } => json_rpc_error_with_data(
            id,
            INTERNAL_ERROR,
            "Internal error",
            Some(Value::String(message)),
        ),
    }
}

fn error_data(code: &str, message: &str, details: Value) -> Value {
    json!({
        "code": code,
        "message": message,
        "details": details
    })
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let request_id = id.as_ref().and_then(value_to_request_id);
    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data: data.clone(),
            message: message.to_string(),
        },
        request_id,
    );

    match serde_json::to_value(response) {
        Ok(mut value) => {
            // `RequestId` holds only strings and i64; other numbers are echoed
            // verbatim and unparseable requests get an explicit `"id": null`.
            if let Some(object) = value.as_object_mut() {
                object.insert("id".to_string(), id.unwrap_or(Value::Null));
            }
            value
        }
        Err(_) => {
            let mut error = json!({ "code": code, "message": message });
            if let Some(data) = data {
                error["data"] = data;
            }
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id.filter(is_valid_id).unwrap_or(Value::Null),
                "error": error
            })
        }
    }
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        if let Ok(value) = serde_json::to_value(response) {
            return value;
        }
    }

    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.unwrap_or(Value::Null),
        "result": result
    })
}

/// Request ids may be strings, numbers or `null`.
pub fn is_valid_id(value: &Value) -> bool {
    value.is_null() || value.is_string() || value.is_number()
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}
