//! Sequential thinking sessions
//!
//! A session is an append-only list of steps stored under
//! `thinking:<caller>:<session_id>`. It is created by the first call that
//! names it (or that names none, in which case an id is generated).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    finish_tool_call, identity::parse_session_id, json_result, parse_arguments, CallerId,
    ToolError, ToolKind, ToolTable, Toolbox,
};
use crate::errors::AppError;
use crate::storage::{storage_key, RecordStore};

pub const THINKING_NAMESPACE: &str = "thinking";

#[macros::mcp_tool(
    name = "sequential_thinking",
    description = "Record one reasoning step, creating the thinking session when needed"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SequentialThinkingTool {
    /// The question or sub-problem this step addresses
    pub query: String,
    /// Existing session to continue; a new session is created when omitted
    pub session_id: Option<String>,
    pub thinking: Option<String>,
    pub conclusion: Option<String>,
}

#[macros::mcp_tool(
    name = "get_thinking_session",
    description = "Return every recorded step of a thinking session"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetThinkingSessionTool {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ThinkingStep {
    pub id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub thinking: String,
    pub conclusion: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ThinkingSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<ThinkingStep>,
}

#[derive(Debug, Clone)]
pub struct StepInput {
    pub query: String,
    pub thinking: Option<String>,
    pub conclusion: Option<String>,
}

impl ThinkingSession {
    pub fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
        }
    }

    /// Step ids follow the session length after the append: `step_1`, `step_2`, ...
    pub fn append(&mut self, input: StepInput, now: DateTime<Utc>) -> ThinkingStep {
        let position = self.steps.len() + 1;
        let step = ThinkingStep {
            id: format!("step_{position}"),
            thinking: input
                .thinking
                .unwrap_or_else(|| format!("Analyzing: {}", input.query)),
            conclusion: input
                .conclusion
                .unwrap_or_else(|| format!("Step {position} recorded")),
            query: input.query,
            timestamp: now,
        };

        self.steps.push(step.clone());
        self.updated_at = now;
        step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingTool {
    SequentialThinking,
    GetThinkingSession,
}

impl ToolKind for ThinkingTool {
    const ALL: &'static [Self] = &[Self::SequentialThinking, Self::GetThinkingSession];

    fn descriptor(self) -> Tool {
        match self {
            Self::SequentialThinking => SequentialThinkingTool::tool(),
            Self::GetThinkingSession => GetThinkingSessionTool::tool(),
        }
    }
}

pub struct ThinkingToolbox {
    table: ToolTable<ThinkingTool>,
    store: RecordStore,
}

impl ThinkingToolbox {
    pub fn new(store: RecordStore) -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
            store,
        })
    }

    async fn record_step(
        &self,
        args: SequentialThinkingTool,
        caller: &CallerId,
    ) -> Result<CallToolResult, ToolError> {
        if args.query.trim().is_empty() {
            return Err(AppError::invalid_params("invalid_query", "query must not be empty").into());
        }

        let session_id = match args.session_id.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => parse_session_id(value)?,
            _ => Uuid::new_v4().to_string(),
        };
        let key = storage_key(THINKING_NAMESPACE, caller.as_str(), Some(&session_id));
        let input = StepInput {
            query: args.query,
            thinking: args.thinking,
            conclusion: args.conclusion,
        };

        let (step, total_steps) = self
            .store
            .update(&key, |record: &mut Option<ThinkingSession>| {
                let now = Utc::now();
                let session =
                    record.get_or_insert_with(|| ThinkingSession::new(session_id.clone(), now));
                let step = session.append(input, now);
                Ok::<_, ToolError>((step, session.steps.len()))
            })
            .await?;

        debug!(session_id = %session_id, total_steps, "thinking step recorded");
        json_result(&json!({
            "session_id": session_id,
            "step": step,
            "total_steps": total_steps,
        }))
    }

    async fn read_session(
        &self,
        args: GetThinkingSessionTool,
        caller: &CallerId,
    ) -> Result<CallToolResult, ToolError> {
        let session_id = parse_session_id(&args.session_id)?;
        let key = storage_key(THINKING_NAMESPACE, caller.as_str(), Some(&session_id));

        match self.store.load::<ThinkingSession>(&key).await? {
            Some(session) => json_result(&session),
            None => Err(ToolError::soft(format!(
                "thinking session not found: {session_id}"
            ))),
        }
    }
}

#[async_trait]
impl Toolbox for ThinkingToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let outcome = match self.table.resolve(name)? {
            ThinkingTool::SequentialThinking => match parse_arguments(arguments) {
                Ok(args) => self.record_step(args, caller).await,
                Err(err) => Err(err.into()),
            },
            ThinkingTool::GetThinkingSession => match parse_arguments(arguments) {
                Ok(args) => self.read_session(args, caller).await,
                Err(err) => Err(err.into()),
            },
        };
        finish_tool_call(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    fn result_json(result: &CallToolResult) -> Value {
        serde_json::to_value(result).expect("serialize result")
    }

    #[test]
    fn append_numbers_steps_by_new_length() {
        let now = Utc::now();
        let mut session = ThinkingSession::new("s-1".to_string(), now);

        let first = session.append(
            StepInput {
                query: "why".to_string(),
                thinking: None,
                conclusion: None,
            },
            now,
        );
        let second = session.append(
            StepInput {
                query: "how".to_string(),
                thinking: Some("consider options".to_string()),
                conclusion: Some("pick one".to_string()),
            },
            now,
        );

        assert_eq!(first.id, "step_1");
        assert_eq!(first.thinking, "Analyzing: why");
        assert_eq!(second.id, "step_2");
        assert_eq!(second.conclusion, "pick one");
        assert_eq!(session.steps.len(), 2);
    }

    #[tokio::test]
    async fn repeated_calls_append_in_order() {
        let toolbox = ThinkingToolbox::new(RecordStore::in_memory()).expect("toolbox");
        let caller = CallerId::parse("alice").expect("caller");

        for query in ["first", "second", "third"] {
            toolbox
                .call_tool(
                    "sequential_thinking",
                    arguments(json!({ "query": query, "session_id": "plan-1" })),
                    &caller,
                )
                .await
                .expect("step");
        }

        let session = toolbox
            .call_tool(
                "get_thinking_session",
                arguments(json!({ "session_id": "plan-1" })),
                &caller,
            )
            .await
            .expect("session");
        let session = result_json(&session);
        let steps = session["structuredContent"]["steps"]
            .as_array()
            .expect("steps");

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0]["id"], "step_1");
        assert_eq!(steps[0]["query"], "first");
        assert_eq!(steps[2]["id"], "step_3");
        assert_eq!(steps[2]["query"], "third");
    }

    #[tokio::test]
    async fn missing_session_id_creates_a_new_session() {
        let toolbox = ThinkingToolbox::new(RecordStore::in_memory()).expect("toolbox");
        let caller = CallerId::parse("alice").expect("caller");

        let result = toolbox
            .call_tool(
                "sequential_thinking",
                arguments(json!({ "query": "start" })),
                &caller,
            )
            .await
            .expect("step");
        let result = result_json(&result);

        let session_id = result["structuredContent"]["session_id"]
            .as_str()
            .expect("generated id");
        assert!(Uuid::parse_str(session_id).is_ok());
        assert_eq!(result["structuredContent"]["total_steps"], 1);
        assert_eq!(result["structuredContent"]["step"]["id"], "step_1");
    }

    #[tokio::test]
    async fn sessions_are_not_shared_between_callers() {
        let toolbox = ThinkingToolbox::new(RecordStore::in_memory()).expect("toolbox");

        toolbox
            .call_tool(
                "sequential_thinking",
                arguments(json!({ "query": "q", "session_id": "shared" })),
                &CallerId::parse("alice").expect("caller"),
            )
            .await
            .expect("step");

        let result = toolbox
            .call_tool(
                "get_thinking_session",
                arguments(json!({ "session_id": "shared" })),
                &CallerId::parse("bob").expect("caller"),
            )
            .await
            .expect("soft error");

        assert_eq!(result_json(&result)["isError"], true);
    }

    #[tokio::test]
    async fn invalid_session_id_is_invalid_params() {
        let toolbox = ThinkingToolbox::new(RecordStore::in_memory()).expect("toolbox");

        let err = toolbox
            .call_tool(
                "sequential_thinking",
                arguments(json!({ "query": "q", "session_id": "a:b" })),
                &CallerId::anonymous(),
            )
            .await
            .expect_err("invalid session id");

        assert!(matches!(err, AppError::InvalidParams { .. }));
    }
}
