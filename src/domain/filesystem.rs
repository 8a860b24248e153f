//! Placeholder filesystem tools
//!
//! The wrapper advertises the usual filesystem tool names but has no storage
//! behind them; every call answers with explanatory text.

use async_trait::async_trait;
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{parse_arguments, text_result, CallerId, ToolKind, ToolTable, Toolbox};
use crate::errors::AppError;

#[macros::mcp_tool(name = "read_file", description = "Read a file (placeholder)")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ReadFileTool {
    pub path: String,
}

#[macros::mcp_tool(name = "write_file", description = "Write a file (placeholder)")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct WriteFileTool {
    pub path: String,
    pub content: String,
}

#[macros::mcp_tool(name = "list_directory", description = "List a directory (placeholder)")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListDirectoryTool {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemTool {
    ReadFile,
    WriteFile,
    ListDirectory,
}

impl ToolKind for FilesystemTool {
    const ALL: &'static [Self] = &[Self::ReadFile, Self::WriteFile, Self::ListDirectory];

    fn descriptor(self) -> Tool {
        match self {
            Self::ReadFile => ReadFileTool::tool(),
            Self::WriteFile => WriteFileTool::tool(),
            Self::ListDirectory => ListDirectoryTool::tool(),
        }
    }
}

pub struct FilesystemToolbox {
    table: ToolTable<FilesystemTool>,
}

impl FilesystemToolbox {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
        })
    }
}

fn placeholder(action: &str, path: &str) -> CallToolResult {
    text_result(format!(
        "{action} is not available in this deployment: no filesystem is attached (path: {path})"
    ))
}

#[async_trait]
impl Toolbox for FilesystemToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let result = match self.table.resolve(name)? {
            FilesystemTool::ReadFile => {
                let args: ReadFileTool = parse_arguments(arguments)?;
                placeholder("read_file", &args.path)
            }
            FilesystemTool::WriteFile => {
                let args: WriteFileTool = parse_arguments(arguments)?;
                placeholder("write_file", &args.path)
            }
            FilesystemTool::ListDirectory => {
                let args: ListDirectoryTool = parse_arguments(arguments)?;
                placeholder("list_directory", &args.path)
            }
        };
        Ok(result)
    }
}
