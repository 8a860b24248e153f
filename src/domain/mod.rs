//! Tool tables exposed by each wrapper kind
//!
//! Every wrapper declares a closed set of tools. The table maps tool names to
//! that set once at startup; handlers return `ToolError::Soft` for failures
//! that belong inside a successful `tools/call` result.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono_tz::Tz;
use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent, Tool};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    config::ServerKind,
    discord_client::DiscordApi,
    errors::AppError,
    storage::{RecordStore, StoreError},
    trello_client::TrelloApi,
};

pub mod discord;
pub mod filesystem;
pub mod identity;
pub mod memory;
pub mod thinking;
pub mod time;
pub mod trello;

pub use identity::CallerId;

#[async_trait]
pub trait Toolbox: Send + Sync {
    /// Static descriptors, in the order `tools/list` reports them.
    fn tools(&self) -> &[Tool];

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        caller: &CallerId,
    ) -> Result<CallToolResult, AppError>;
}

pub trait ToolKind: Copy + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn descriptor(self) -> Tool;
}

pub struct ToolTable<K> {
    descriptors: Vec<Tool>,
    index: HashMap<String, K>,
}

impl<K: ToolKind> ToolTable<K> {
    pub fn build() -> Result<Self, AppError> {
        let mut descriptors = Vec::with_capacity(K::ALL.len());
        let mut index = HashMap::with_capacity(K::ALL.len());

        for kind in K::ALL {
            let descriptor = kind.descriptor();
            if index.insert(descriptor.name.clone(), *kind).is_some() {
                return Err(AppError::internal(format!(
                    "duplicate tool name in table: {}",
                    descriptor.name
                )));
            }
            descriptors.push(descriptor);
        }

        Ok(Self { descriptors, index })
    }

    pub fn descriptors(&self) -> &[Tool] {
        &self.descriptors
    }

    pub fn resolve(&self, name: &str) -> Result<K, AppError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| AppError::tool_not_found(name))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Soft(String),
    #[error(transparent)]
    Hard(#[from] AppError),
}

impl ToolError {
    pub fn soft(message: impl Into<String>) -> Self {
        Self::Soft(message.into())
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        Self::Hard(err.into())
    }
}

/// Collapses a handler outcome: soft failures become `isError` results,
/// hard failures stay RPC errors.
pub fn finish_tool_call(
    outcome: Result<CallToolResult, ToolError>,
) -> Result<CallToolResult, AppError> {
    match outcome {
        Ok(result) => Ok(result),
        Err(ToolError::Soft(message)) => Ok(soft_error_result(message)),
        Err(ToolError::Hard(err)) => Err(err),
    }
}

pub fn parse_arguments<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| AppError::invalid_params("invalid_arguments", err.to_string()))
}

pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text.into(), None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

pub fn soft_error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult {
        is_error: Some(true),
        ..text_result(message)
    }
}

/// Text content carries the pretty-printed value; objects are also returned
/// as structured content.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ToolError> {
    let value = serde_json::to_value(value)
        .map_err(|err| AppError::internal(format!("tool result serialization failed: {err}")))?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|err| AppError::internal(format!("tool result serialization failed: {err}")))?;

    Ok(CallToolResult {
        structured_content: value.as_object().cloned(),
        ..text_result(text)
    })
}

/// Upstream clients and settings that only some wrapper kinds use.
#[derive(Clone)]
pub struct Integrations {
    pub discord: Option<Arc<dyn DiscordApi>>,
    pub trello: Option<Arc<dyn TrelloApi>>,
    pub local_timezone: Tz,
}

impl Default for Integrations {
    fn default() -> Self {
        Self {
            discord: None,
            trello: None,
            local_timezone: Tz::UTC,
        }
    }
}

pub fn build_toolbox(
    kind: ServerKind,
    store: RecordStore,
    integrations: Integrations,
) -> Result<Arc<dyn Toolbox>, AppError> {
    let toolbox: Arc<dyn Toolbox> = match kind {
        ServerKind::Memory => Arc::new(memory::MemoryToolbox::new(store)?),
        ServerKind::Thinking => Arc::new(thinking::ThinkingToolbox::new(store)?),
        ServerKind::Discord => {
            let client = integrations
                .discord
                .ok_or_else(|| AppError::internal("discord client is not configured"))?;
            Arc::new(discord::DiscordToolbox::new(client)?)
        }
        ServerKind::Trello => {
            let client = integrations
                .trello
                .ok_or_else(|| AppError::internal("trello client is not configured"))?;
            Arc::new(trello::TrelloToolbox::new(client)?)
        }
        ServerKind::Time => Arc::new(time::TimeToolbox::new(integrations.local_timezone)?),
        ServerKind::Filesystem => Arc::new(filesystem::FilesystemToolbox::new()?),
    };

    Ok(toolbox)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn soft_errors_are_flagged_results() {
        let result = finish_tool_call(Err(ToolError::soft("record missing"))).expect("soft");
        let value = serde_json::to_value(result).expect("serialize");

        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "record missing");
    }

    #[test]
    fn hard_errors_stay_errors() {
        let err = finish_tool_call(Err(ToolError::Hard(AppError::internal("boom"))))
            .expect_err("hard");
        assert!(matches!(err, AppError::Internal { .. }));
    }

    #[test]
    fn invalid_arguments_are_invalid_params() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Args {
            query: String,
        }

        let arguments = json!({ "query": 5 }).as_object().cloned().expect("object");
        let err = parse_arguments::<Args>(arguments).expect_err("type mismatch");
        assert!(matches!(err, AppError::InvalidParams { .. }));
    }

    #[test]
    fn upstream_kinds_require_their_client() {
        for kind in [ServerKind::Discord, ServerKind::Trello] {
            let err = build_toolbox(kind, RecordStore::in_memory(), Integrations::default())
                .err()
                .expect("missing client");
            assert!(matches!(err, AppError::Internal { .. }));
        }
        assert!(
            build_toolbox(ServerKind::Time, RecordStore::in_memory(), Integrations::default())
                .is_ok()
        );
    }

    #[test]
    fn every_wrapper_table_builds_without_duplicates() {
        assert_eq!(
            ToolTable::<memory::MemoryTool>::build()
                .expect("memory")
                .descriptors()
                .len(),
            memory::MemoryTool::ALL.len()
        );
        assert_eq!(
            ToolTable::<thinking::ThinkingTool>::build()
                .expect("thinking")
                .descriptors()
                .len(),
            thinking::ThinkingTool::ALL.len()
        );
        assert_eq!(
            ToolTable::<discord::DiscordTool>::build()
                .expect("discord")
                .descriptors()
                .len(),
            discord::DiscordTool::ALL.len()
        );
        assert_eq!(
            ToolTable::<time::TimeTool>::build()
                .expect("time")
                .descriptors()
                .len(),
            time::TimeTool::ALL.len()
        );
        assert_eq!(
            ToolTable::<trello::TrelloTool>::build()
                .expect("trello")
                .descriptors()
                .len(),
            trello::TrelloTool::ALL.len()
        );
        assert_eq!(
            ToolTable::<filesystem::FilesystemTool>::build()
                .expect("filesystem")
                .descriptors()
                .len(),
            filesystem::FilesystemTool::ALL.len()
        );
    }
}
