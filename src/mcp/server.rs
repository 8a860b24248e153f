//! The central Model Context Protocol engine
//!
//! Validates JSON-RPC envelopes, routes methods to their handlers and folds
//! handler outcomes back into result or error envelopes. The capability and
//! tool descriptors are rendered once when the dispatcher is built.

use std::sync::Arc;

use rust_mcp_sdk::schema::{
    CallToolRequestParams, Implementation, InitializeResult, ListToolsResult, ProtocolVersion,
    ServerCapabilities, ServerCapabilitiesTools,
};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::config::ServerKind;
use crate::domain::{CallerId, Toolbox};
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, is_valid_id, json_rpc_result, JSONRPC_VERSION,
};

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub kind: ServerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
}

impl McpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(Self::Initialize),
            "notifications/initialized" => Some(Self::Initialized),
            "ping" => Some(Self::Ping),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// A dispatched request and its result or error envelope.
    Reply(Value),
    /// The envelope itself was malformed.
    Rejected(Value),
    /// A notification; nothing is sent back.
    Accepted,
}

#[derive(Debug)]
struct Envelope {
    /// `None` when the request carried no `id` member at all.
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

pub struct Dispatcher {
    service: ServiceInfo,
    toolbox: Arc<dyn Toolbox>,
    initialize_result: Value,
    tools_list_result: Value,
}

impl Dispatcher {
    pub fn new(service: ServiceInfo, toolbox: Arc<dyn Toolbox>) -> Result<Self, AppError> {
        let initialize_result = InitializeResult {
            server_info: Implementation {
                name: service.name.clone(),
                version: service.version.clone(),
                title: None,
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::V2024_11_05.into(),
            instructions: Some(instructions_for(service.kind).to_string()),
            meta: None,
        };
        let initialize_result = serde_json::to_value(initialize_result).map_err(|err| {
            AppError::internal(format!("initialize result serialization failed: {err}"))
        })?;

        let tools_list_result = serde_json::to_value(ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: toolbox.tools().to_vec(),
        })
        .map_err(|err| AppError::internal(format!("tools list serialization failed: {err}")))?;

        Ok(Self {
            service,
            toolbox,
            initialize_result,
            tools_list_result,
        })
    }

    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    pub async fn handle(&self, payload: Value, caller: &CallerId) -> RpcOutcome {
        let envelope = match parse_envelope(payload) {
            Ok(envelope) => envelope,
            Err(rejection) => return RpcOutcome::Rejected(rejection),
        };

        let audit_params = redact_audit_params(envelope.params.as_ref());
        let outcome = match McpMethod::parse(&envelope.method) {
            Some(method) => self.dispatch(method, envelope.params, caller).await,
            None => Err(AppError::method_not_found(envelope.method.as_str())),
        };

        if let Err(AppError::Internal { message }) = &outcome {
            error!(method = %envelope.method, error = %message, "mcp method failed");
        }

        let Some(id) = envelope.id else {
            info!(
                method = %envelope.method,
                caller = %caller,
                params = %audit_params,
                outcome = if outcome.is_ok() { "success" } else { "failure" },
                "mcp notification audited"
            );
            return RpcOutcome::Accepted;
        };

        let response = match outcome {
            Ok(result) => json_rpc_result(Some(id), result),
            Err(err) => app_error_to_json_rpc(Some(id), err),
        };

        info!(
            method = %envelope.method,
            caller = %caller,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        RpcOutcome::Reply(response)
    }

    async fn dispatch(
        &self,
        method: McpMethod,
        params: Option<Value>,
        caller: &CallerId,
    ) -> Result<Value, AppError> {
        match method {
            McpMethod::Initialize => {
                if let Some(offered) = params
                    .as_ref()
                    .and_then(|params| params.get("protocolVersion"))
                    .and_then(Value::as_str)
                {
                    debug!(
                        offered,
                        supported = SUPPORTED_PROTOCOL_VERSION,
                        "initialize negotiated"
                    );
                }
                Ok(self.initialize_result.clone())
            }
            McpMethod::Initialized | McpMethod::Ping => Ok(json!({})),
            McpMethod::ToolsList => Ok(self.tools_list_result.clone()),
            McpMethod::ToolsCall => self.call_tool(params, caller).await,
        }
    }

    async fn call_tool(&self, params: Option<Value>, caller: &CallerId) -> Result<Value, AppError> {
        let params = params.ok_or_else(|| {
            AppError::invalid_params("missing_params", "tools/call requires name and arguments")
        })?;
        let call: CallToolRequestParams = serde_json::from_value(params)
            .map_err(|err| AppError::invalid_params("invalid_params", err.to_string()))?;

        let result = self
            .toolbox
            .call_tool(&call.name, call.arguments.unwrap_or_default(), caller)
            .await?;

        serde_json::to_value(result)
            .map_err(|err| AppError::internal(format!("tool result serialization failed: {err}")))
    }
}

fn instructions_for(kind: ServerKind) -> &'static str {
    match kind {
        ServerKind::Memory => "Knowledge-graph memory scoped to the calling user.",
        ServerKind::Thinking => {
            "Append-only sequential thinking sessions scoped to the calling user."
        }
        ServerKind::Discord => {
            "Send and read Discord channel messages through the configured bot."
        }
        ServerKind::Trello => {
            "Boards, lists, cards and checklists of the configured Trello member."
        }
        ServerKind::Time => "Current time and conversions between IANA timezones.",
        ServerKind::Filesystem => "Filesystem tools are placeholders in this deployment.",
    }
}

fn invalid_request(id: Option<Value>, code: &'static str, message: &str) -> Value {
    app_error_to_json_rpc(id, AppError::invalid_request(code, message))
}

fn parse_envelope(payload: Value) -> Result<Envelope, Value> {
    let Value::Object(mut object) = payload else {
        return Err(invalid_request(
            None,
            "invalid_envelope",
            "request must be a JSON object",
        ));
    };

    let id = object.remove("id");
    if let Some(id) = &id {
        if !is_valid_id(id) {
            return Err(invalid_request(
                None,
                "invalid_id",
                "id must be a string, a number or null",
            ));
        }
    }

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid_request(
            id,
            "invalid_jsonrpc_version",
            "jsonrpc must be \"2.0\"",
        ));
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) if !method.trim().is_empty() => method,
        _ => {
            return Err(invalid_request(
                id,
                "invalid_method",
                "method must be a non-empty string",
            ))
        }
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => None,
        Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
        Some(_) => {
            return Err(invalid_request(
                id,
                "invalid_params_shape",
                "params must be an object or an array",
            ))
        }
    };

    Ok(Envelope { id, method, params })
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::{
        filesystem::FilesystemToolbox,
        memory::{MemoryToolbox, MEMORY_NAMESPACE},
    };
    use crate::mcp::rpc::{INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND};
    use crate::storage::{storage_key, KvStore, MemoryKvStore, RecordStore, UpdatePolicy};

    fn dispatcher() -> Dispatcher {
        let toolbox = Arc::new(MemoryToolbox::new(RecordStore::in_memory()).expect("toolbox"));
        Dispatcher::new(
            ServiceInfo {
                name: "mcp-memory-server".to_string(),
                version: "1.2.3".to_string(),
                kind: ServerKind::Memory,
            },
            toolbox,
        )
        .expect("dispatcher")
    }

    fn reply(outcome: RpcOutcome) -> Value {
        match outcome {
            RpcOutcome::Reply(value) => value,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    fn rejection(outcome: RpcOutcome) -> Value {
        match outcome {
            RpcOutcome::Rejected(value) => value,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_protocol_marker_is_invalid_request_with_echoed_id() {
        let dispatcher = dispatcher();

        let response = rejection(
            dispatcher
                .handle(json!({ "id": 9, "method": "tools/list" }), &CallerId::anonymous())
                .await,
        );
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(response["id"], 9);

        let response = rejection(
            dispatcher
                .handle(
                    json!({ "jsonrpc": "1.0", "id": "abc", "method": "tools/list" }),
                    &CallerId::anonymous(),
                )
                .await,
        );
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(response["id"], "abc");
    }

    #[tokio::test]
    async fn unparseable_envelope_has_null_id() {
        let dispatcher = dispatcher();

        let payloads = [
            json!([1, 2]),
            json!("tools/list"),
            json!({ "jsonrpc": "2.0", "id": { "x": 1 }, "method": "ping" }),
        ];
        for payload in payloads {
            let response = rejection(dispatcher.handle(payload, &CallerId::anonymous()).await);
            assert_eq!(response["error"]["code"], INVALID_REQUEST);
            assert_eq!(response["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list" }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(response["error"]["data"]["details"]["method"], "resources/list");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_not_a_result() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 4,
                        "method": "tools/call",
                        "params": { "name": "send_message", "arguments": {} }
                    }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert!(response.get("result").is_none());
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(response["error"]["data"]["code"], "tool_not_found");
        assert_eq!(response["id"], 4);
    }

    #[tokio::test]
    async fn tools_call_without_params_is_invalid_params() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call" }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_list_is_byte_identical_across_calls() {
        let dispatcher = dispatcher();
        let request = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" });

        let first = reply(dispatcher.handle(request.clone(), &CallerId::anonymous()).await);
        let second = reply(dispatcher.handle(request, &CallerId::anonymous()).await);

        assert_eq!(
            serde_json::to_vec(&first).expect("first"),
            serde_json::to_vec(&second).expect("second")
        );
        assert_eq!(first["result"]["tools"][0]["name"], "create_entities");
    }

    #[tokio::test]
    async fn initialize_reports_configured_identity() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": "initialize",
                        "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
                    }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["result"]["protocolVersion"], SUPPORTED_PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "mcp-memory-server");
        assert_eq!(response["result"]["serverInfo"]["version"], "1.2.3");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn notifications_produce_no_reply() {
        let outcome = dispatcher()
            .handle(
                json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
                &CallerId::anonymous(),
            )
            .await;

        assert_eq!(outcome, RpcOutcome::Accepted);
    }

    #[tokio::test]
    async fn null_id_is_echoed_as_null() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn placeholder_tool_calls_return_results() {
        let toolbox = Arc::new(FilesystemToolbox::new().expect("toolbox"));
        let dispatcher = Dispatcher::new(
            ServiceInfo {
                name: "fs".to_string(),
                version: "0".to_string(),
                kind: ServerKind::Filesystem,
            },
            toolbox,
        )
        .expect("dispatcher");

        let response = reply(
            dispatcher
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": "call-1",
                        "method": "tools/call",
                        "params": { "name": "list_directory", "arguments": { "path": "/" } }
                    }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["id"], "call-1");
        assert!(response["result"]["content"].is_array());
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn fractional_id_is_echoed() {
        let response = reply(
            dispatcher()
                .handle(
                    json!({ "jsonrpc": "2.0", "id": 1.5, "method": "ping" }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert_eq!(response["id"], json!(1.5));
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn large_unsigned_id_is_echoed_on_success_and_error() {
        let dispatcher = dispatcher();

        let success = reply(
            dispatcher
                .handle(
                    json!({ "jsonrpc": "2.0", "id": u64::MAX, "method": "ping" }),
                    &CallerId::anonymous(),
                )
                .await,
        );
        assert_eq!(success["id"], json!(u64::MAX));

        let failure = reply(
            dispatcher
                .handle(
                    json!({ "jsonrpc": "2.0", "id": u64::MAX, "method": "resources/list" }),
                    &CallerId::anonymous(),
                )
                .await,
        );
        assert_eq!(failure["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(failure["id"], json!(u64::MAX));
    }

    #[tokio::test]
    async fn corrupt_stored_graph_is_internal_error_with_data() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put(
            &storage_key(MEMORY_NAMESPACE, "anonymous", None),
            "{not json".to_string(),
        )
        .await
        .expect("seed corrupt record");
        let toolbox = Arc::new(
            MemoryToolbox::new(RecordStore::new(kv, UpdatePolicy::Serialized)).expect("toolbox"),
        );
        let dispatcher = Dispatcher::new(
            ServiceInfo {
                name: "mcp-memory-server".to_string(),
                version: "1.2.3".to_string(),
                kind: ServerKind::Memory,
            },
            toolbox,
        )
        .expect("dispatcher");

        let response = reply(
            dispatcher
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 11,
                        "method": "tools/call",
                        "params": { "name": "read_graph", "arguments": {} }
                    }),
                    &CallerId::anonymous(),
                )
                .await,
        );

        assert!(response.get("result").is_none());
        assert_eq!(response["id"], 11);
        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["message"], "Internal error");
        assert!(response["error"]["data"]
            .as_str()
            .expect("message as data")
            .contains("memory:anonymous"));
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "send_message",
            "arguments": {
                "channel_id": "123456789012345678",
                "token": "should-not-appear",
                "api_key": "should-not-appear",
                "nested": {
                    "client_secret": "should-not-appear"
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("send_message"));
        assert_eq!(redacted["arguments"]["channel_id"], json!("123456789012345678"));
        assert_eq!(redacted["arguments"]["token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["api_key"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["nested"]["client_secret"],
            json!("[REDACTED]")
        );
    }
}
