//! Discord REST proxy tools
//!
//! Each call is one outbound request through `DiscordApi`. Upstream failures
//! are reported as soft tool errors so the RPC response itself succeeds.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::discord_client::{DiscordApi, DiscordError};
use crate::domain::{
    finish_tool_call, json_result, parse_arguments, CallerId, ToolError, ToolKind, ToolTable,
    Toolbox,
};
use crate::errors::AppError;

pub const DEFAULT_READ_LIMIT: u8 = 50;
pub const MAX_READ_LIMIT: u8 = 100;
pub const MAX_MESSAGE_LENGTH: usize = 2_000;

static SNOWFLAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{15,25}$").expect("snowflake pattern is valid"));

#[macros::mcp_tool(name = "send_message", description = "Send a text message to a Discord channel")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SendMessageTool {
    /// Numeric Discord channel id
    pub channel_id: String,
    pub content: String,
}

#[macros::mcp_tool(
    name = "read_messages",
    description = "Read the most recent messages of a Discord channel"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ReadMessagesTool {
    pub channel_id: String,
    /// 1-100, defaults to 50
    pub limit: Option<u32>,
}

#[macros::mcp_tool(name = "get_channel", description = "Fetch metadata of a Discord channel")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetChannelTool {
    pub channel_id: String,
}

fn validate_channel_id(channel_id: &str) -> Result<&str, AppError> {
    let channel_id = channel_id.trim();
    if !SNOWFLAKE.is_match(channel_id) {
        return Err(AppError::invalid_params(
            "invalid_channel_id",
            "channel_id must be a numeric Discord snowflake",
        ));
    }
    Ok(channel_id)
}

fn normalize_read_limit(limit: Option<u32>) -> Result<u8, AppError> {
    match limit {
        None => Ok(DEFAULT_READ_LIMIT),
        Some(value) if (1..=u32::from(MAX_READ_LIMIT)).contains(&value) => Ok(value as u8),
        Some(_) => Err(AppError::invalid_params(
            "invalid_limit",
            "limit must be between 1 and 100",
        )),
    }
}

fn upstream_failure(tool: &str, err: DiscordError) -> ToolError {
    warn!(tool, error = %err, "discord call failed");
    ToolError::soft(format!("Discord API error: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscordTool {
    SendMessage,
    ReadMessages,
    GetChannel,
}

impl ToolKind for DiscordTool {
    const ALL: &'static [Self] = &[Self::SendMessage, Self::ReadMessages, Self::GetChannel];

    fn descriptor(self) -> Tool {
        match self {
            Self::SendMessage => SendMessageTool::tool(),
            Self::ReadMessages => ReadMessagesTool::tool(),
            Self::GetChannel => GetChannelTool::tool(),
        }
    }
}

pub struct DiscordToolbox {
    table: ToolTable<DiscordTool>,
    client: Arc<dyn DiscordApi>,
}

impl DiscordToolbox {
    pub fn new(client: Arc<dyn DiscordApi>) -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
            client,
        })
    }

    async fn run(
        &self,
        tool: DiscordTool,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ToolError> {
        match tool {
            DiscordTool::SendMessage => {
                let args: SendMessageTool = parse_arguments(arguments)?;
                let channel_id = validate_channel_id(&args.channel_id)?;
                if args.content.trim().is_empty()
                    || args.content.chars().count() > MAX_MESSAGE_LENGTH
                {
                    return Err(AppError::invalid_params(
                        "invalid_content",
                        "content must be 1-2000 characters",
                    )
                    .into());
                }

                let message = self
                    .client
                    .send_message(channel_id, &args.content)
                    .await
                    .map_err(|err| upstream_failure("send_message", err))?;
                json_result(&json!({ "sent": true, "message": message }))
            }
            DiscordTool::ReadMessages => {
                let args: ReadMessagesTool = parse_arguments(arguments)?;
                let channel_id = validate_channel_id(&args.channel_id)?;
                let limit = normalize_read_limit(args.limit)?;

                let messages = self
                    .client
                    .read_messages(channel_id, limit)
                    .await
                    .map_err(|err| upstream_failure("read_messages", err))?;
                json_result(&json!({
                    "channel_id": channel_id,
                    "returned": messages.len(),
                    "messages": messages,
                }))
            }
            DiscordTool::GetChannel => {
                let args: GetChannelTool = parse_arguments(arguments)?;
                let channel_id = validate_channel_id(&args.channel_id)?;

                let channel = self
                    .client
                    .get_channel(channel_id)
                    .await
                    .map_err(|err| upstream_failure("get_channel", err))?;
                json_result(&channel)
            }
        }
    }
}

#[async_trait]
impl Toolbox for DiscordToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    /// Discord calls act as the bot, so the caller id is not used here.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let tool = self.table.resolve(name)?;
        finish_tool_call(self.run(tool, arguments).await)
    }
}
