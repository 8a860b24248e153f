//! Trello REST proxy tools
//!
//! Every tool maps its arguments to exactly one `TrelloRequest`. Upstream
//! failures become soft tool errors, like the Discord wrapper.

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

use crate::domain::{
    finish_tool_call, json_result, parse_arguments, CallerId, ToolError, ToolKind, ToolTable,
    Toolbox,
};
use crate::errors::AppError;
use crate::trello_client::{TrelloApi, TrelloError, TrelloRequest};

static TRELLO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,64}$").expect("trello id pattern is valid"));

#[macros::mcp_tool(name = "get_board", description = "Get a Trello board by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetBoardTool {
    pub board_id: String,
}

#[macros::mcp_tool(
    name = "get_boards",
    description = "List the boards of the authenticated member"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetBoardsTool {}

#[macros::mcp_tool(name = "get_board_labels", description = "List the labels of a board")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetBoardLabelsTool {
    pub board_id: String,
}

#[macros::mcp_tool(name = "create_board_label", description = "Add a label to a board")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateBoardLabelTool {
    pub board_id: String,
    pub name: String,
    /// Trello label color, e.g. green, red or sky
    pub color: Option<String>,
}

#[macros::mcp_tool(name = "get_list", description = "Get a Trello list by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetListTool {
    pub list_id: String,
}

#[macros::mcp_tool(name = "get_lists", description = "List the lists of a board")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetListsTool {
    pub board_id: String,
}

#[macros::mcp_tool(name = "create_list", description = "Create a list on a board")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateListTool {
    pub board_id: String,
    pub name: String,
    /// top, bottom or a positive number; defaults to bottom
    pub pos: Option<String>,
}

#[macros::mcp_tool(name = "update_list", description = "Rename a list")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateListTool {
    pub list_id: String,
    pub name: String,
}

#[macros::mcp_tool(name = "delete_list", description = "Archive a list")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DeleteListTool {
    pub list_id: String,
}

#[macros::mcp_tool(name = "get_card", description = "Get a Trello card by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetCardTool {
    pub card_id: String,
}

#[macros::mcp_tool(name = "get_cards", description = "List the cards of a list")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetCardsTool {
    pub list_id: String,
}

#[macros::mcp_tool(name = "create_card", description = "Create a card in a list")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateCardTool {
    pub list_id: String,
    pub name: String,
    pub desc: Option<String>,
    /// ISO 8601 due date
    pub due: Option<String>,
    /// Comma-separated label ids
    pub id_labels: Option<String>,
}

#[macros::mcp_tool(name = "update_card", description = "Update attributes of a card")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateCardTool {
    pub card_id: String,
    pub name: Option<String>,
    pub desc: Option<String>,
    pub closed: Option<bool>,
    /// Comma-separated member ids
    pub id_members: Option<String>,
    /// Move the card to this list
    pub id_list: Option<String>,
    /// Comma-separated label ids
    pub id_labels: Option<String>,
    pub pos: Option<String>,
    pub due: Option<String>,
    pub start: Option<String>,
    pub due_complete: Option<bool>,
    pub subscribed: Option<bool>,
}

#[macros::mcp_tool(name = "delete_card", description = "Delete a card")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DeleteCardTool {
    pub card_id: String,
}

#[macros::mcp_tool(name = "get_checklist", description = "Get a checklist by id")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetChecklistTool {
    pub checklist_id: String,
}

#[macros::mcp_tool(name = "get_card_checklists", description = "List the checklists of a card")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetCardChecklistsTool {
    pub card_id: String,
}

#[macros::mcp_tool(name = "create_checklist", description = "Create a checklist on a card")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateChecklistTool {
    pub card_id: String,
    pub name: String,
    pub pos: Option<String>,
}

#[macros::mcp_tool(name = "update_checklist", description = "Rename or move a checklist")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateChecklistTool {
    pub checklist_id: String,
    pub name: Option<String>,
    pub pos: Option<String>,
}

#[macros::mcp_tool(name = "delete_checklist", description = "Delete a checklist")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DeleteChecklistTool {
    pub checklist_id: String,
}

#[macros::mcp_tool(name = "add_checkitem", description = "Add an item to a checklist")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddCheckitemTool {
    pub checklist_id: String,
    pub name: String,
    /// Defaults to false
    pub checked: Option<bool>,
    pub pos: Option<String>,
}

#[macros::mcp_tool(name = "update_checkitem", description = "Update an item of a checklist")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateCheckitemTool {
    pub checklist_id: String,
    pub checkitem_id: String,
    pub name: Option<String>,
    pub checked: Option<bool>,
    pub pos: Option<String>,
}

#[macros::mcp_tool(name = "delete_checkitem", description = "Delete an item of a checklist")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DeleteCheckitemTool {
    pub checklist_id: String,
    pub checkitem_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrelloTool {
    GetBoard,
    GetBoards,
    GetBoardLabels,
    CreateBoardLabel,
    GetList,
    GetLists,
    CreateList,
    UpdateList,
    DeleteList,
    GetCard,
    GetCards,
    CreateCard,
    UpdateCard,
    DeleteCard,
    GetChecklist,
    GetCardChecklists,
    CreateChecklist,
    UpdateChecklist,
    DeleteChecklist,
    AddCheckitem,
    UpdateCheckitem,
    DeleteCheckitem,
}

impl ToolKind for TrelloTool {
    const ALL: &'static [Self] = &[
        Self::GetBoard,
        Self::GetBoards,
        Self::GetBoardLabels,
        Self::CreateBoardLabel,
        Self::GetList,
        Self::GetLists,
        Self::CreateList,
        Self::UpdateList,
        Self::DeleteList,
        Self::GetCard,
        Self::GetCards,
        Self::CreateCard,
        Self::UpdateCard,
        Self::DeleteCard,
        Self::GetChecklist,
        Self::GetCardChecklists,
        Self::CreateChecklist,
        Self::UpdateChecklist,
        Self::DeleteChecklist,
        Self::AddCheckitem,
        Self::UpdateCheckitem,
        Self::DeleteCheckitem,
    ];

    fn descriptor(self) -> Tool {
        match self {
            Self::GetBoard => GetBoardTool::tool(),
            Self::GetBoards => GetBoardsTool::tool(),
            Self::GetBoardLabels => GetBoardLabelsTool::tool(),
            Self::CreateBoardLabel => CreateBoardLabelTool::tool(),
            Self::GetList => GetListTool::tool(),
            Self::GetLists => GetListsTool::tool(),
            Self::CreateList => CreateListTool::tool(),
            Self::UpdateList => UpdateListTool::tool(),
            Self::DeleteList => DeleteListTool::tool(),
            Self::GetCard => GetCardTool::tool(),
            Self::GetCards => GetCardsTool::tool(),
            Self::CreateCard => CreateCardTool::tool(),
            Self::UpdateCard => UpdateCardTool::tool(),
            Self::DeleteCard => DeleteCardTool::tool(),
            Self::GetChecklist => GetChecklistTool::tool(),
            Self::GetCardChecklists => GetCardChecklistsTool::tool(),
            Self::CreateChecklist => CreateChecklistTool::tool(),
            Self::UpdateChecklist => UpdateChecklistTool::tool(),
            Self::DeleteChecklist => DeleteChecklistTool::tool(),
            Self::AddCheckitem => AddCheckitemTool::tool(),
            Self::UpdateCheckitem => UpdateCheckitemTool::tool(),
            Self::DeleteCheckitem => DeleteCheckitemTool::tool(),
        }
    }
}

fn trello_id<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if !TRELLO_ID.is_match(value) {
        return Err(AppError::invalid_params(
            "invalid_trello_id",
            format!("{field} must be an alphanumeric Trello id"),
        ));
    }
    Ok(value)
}

fn required_text(field: &'static str, value: String) -> Result<String, AppError> {
    if value.trim().is_empty() {
        return Err(AppError::invalid_params(
            "invalid_arguments",
            format!("{field} must not be empty"),
        ));
    }
    Ok(value)
}

/// Request body holding only the fields that were supplied.
fn body_of<const N: usize>(fields: [(&'static str, Option<Value>); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
        .collect()
}

fn non_empty_update(body: Map<String, Value>) -> Result<Value, AppError> {
    if body.is_empty() {
        return Err(AppError::invalid_params(
            "empty_update",
            "at least one field to update is required",
        ));
    }
    Ok(Value::Object(body))
}

/// Maps one tool call to the Trello endpoint it proxies.
pub fn plan_request(
    tool: TrelloTool,
    arguments: Map<String, Value>,
) -> Result<TrelloRequest, AppError> {
    let request = match tool {
        TrelloTool::GetBoard => {
            let args: GetBoardTool = parse_arguments(arguments)?;
            TrelloRequest::get(format!("/boards/{}", trello_id("board_id", &args.board_id)?))
        }
        TrelloTool::GetBoards => {
            let _: GetBoardsTool = parse_arguments(arguments)?;
            TrelloRequest::get("/members/me/boards")
        }
        TrelloTool::GetBoardLabels => {
            let args: GetBoardLabelsTool = parse_arguments(arguments)?;
            let board_id = trello_id("board_id", &args.board_id)?;
            TrelloRequest::get(format!("/boards/{board_id}/labels"))
        }
        TrelloTool::CreateBoardLabel => {
            let args: CreateBoardLabelTool = parse_arguments(arguments)?;
            let board_id = trello_id("board_id", &args.board_id)?;
            let body = body_of([
                ("name", Some(required_text("name", args.name)?.into())),
                ("color", args.color.map(Value::from)),
            ]);
            TrelloRequest::post(format!("/boards/{board_id}/labels"), Value::Object(body))
        }
        TrelloTool::GetList => {
            let args: GetListTool = parse_arguments(arguments)?;
            TrelloRequest::get(format!("/lists/{}", trello_id("list_id", &args.list_id)?))
        }
        TrelloTool::GetLists => {
            let args: GetListsTool = parse_arguments(arguments)?;
            let board_id = trello_id("board_id", &args.board_id)?;
            TrelloRequest::get(format!("/boards/{board_id}/lists"))
        }
        TrelloTool::CreateList => {
            let args: CreateListTool = parse_arguments(arguments)?;
            let board_id = trello_id("board_id", &args.board_id)?;
            TrelloRequest::post(
                "/lists",
                json!({
                    "name": required_text("name", args.name)?,
                    "idBoard": board_id,
                    "pos": args.pos.unwrap_or_else(|| "bottom".to_string()),
                }),
            )
        }
        TrelloTool::UpdateList => {
            let args: UpdateListTool = parse_arguments(arguments)?;
            let list_id = trello_id("list_id", &args.list_id)?;
            TrelloRequest::put(
                format!("/lists/{list_id}"),
                json!({ "name": required_text("name", args.name)? }),
            )
        }
        TrelloTool::DeleteList => {
            let args: DeleteListTool = parse_arguments(arguments)?;
            let list_id = trello_id("list_id", &args.list_id)?;
            TrelloRequest::put(format!("/lists/{list_id}/closed"), json!({ "value": true }))
        }
        TrelloTool::GetCard => {
            let args: GetCardTool = parse_arguments(arguments)?;
            TrelloRequest::get(format!("/cards/{}", trello_id("card_id", &args.card_id)?))
        }
        TrelloTool::GetCards => {
            let args: GetCardsTool = parse_arguments(arguments)?;
            let list_id = trello_id("list_id", &args.list_id)?;
            TrelloRequest::get(format!("/lists/{list_id}/cards"))
        }
        TrelloTool::CreateCard => {
            let args: CreateCardTool = parse_arguments(arguments)?;
            let list_id = trello_id("list_id", &args.list_id)?;
            let body = body_of([
                ("idList", Some(list_id.into())),
                ("name", Some(required_text("name", args.name)?.into())),
                ("desc", args.desc.map(Value::from)),
                ("due", args.due.map(Value::from)),
                ("idLabels", args.id_labels.map(Value::from)),
            ]);
            TrelloRequest::post("/cards", Value::Object(body))
        }
        TrelloTool::UpdateCard => {
            let args: UpdateCardTool = parse_arguments(arguments)?;
            let card_id = trello_id("card_id", &args.card_id)?;
            let id_list = args
                .id_list
                .as_deref()
                .map(|id| trello_id("id_list", id).map(Value::from))
                .transpose()?;
            let body = body_of([
                ("name", args.name.map(Value::from)),
                ("desc", args.desc.map(Value::from)),
                ("closed", args.closed.map(Value::from)),
                ("idMembers", args.id_members.map(Value::from)),
                ("idList", id_list),
                ("idLabels", args.id_labels.map(Value::from)),
                ("pos", args.pos.map(Value::from)),
                ("due", args.due.map(Value::from)),
                ("start", args.start.map(Value::from)),
                ("dueComplete", args.due_complete.map(Value::from)),
                ("subscribed", args.subscribed.map(Value::from)),
            ]);
            TrelloRequest::put(format!("/cards/{card_id}"), non_empty_update(body)?)
        }
        TrelloTool::DeleteCard => {
            let args: DeleteCardTool = parse_arguments(arguments)?;
            TrelloRequest::delete(format!("/cards/{}", trello_id("card_id", &args.card_id)?))
        }
        TrelloTool::GetChecklist => {
            let args: GetChecklistTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            TrelloRequest::get(format!("/checklists/{checklist_id}"))
        }
        TrelloTool::GetCardChecklists => {
            let args: GetCardChecklistsTool = parse_arguments(arguments)?;
            let card_id = trello_id("card_id", &args.card_id)?;
            TrelloRequest::get(format!("/cards/{card_id}/checklists"))
        }
        TrelloTool::CreateChecklist => {
            let args: CreateChecklistTool = parse_arguments(arguments)?;
            let card_id = trello_id("card_id", &args.card_id)?;
            let body = body_of([
                ("idCard", Some(card_id.into())),
                ("name", Some(required_text("name", args.name)?.into())),
                ("pos", args.pos.map(Value::from)),
            ]);
            TrelloRequest::post("/checklists", Value::Object(body))
        }
        TrelloTool::UpdateChecklist => {
            let args: UpdateChecklistTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            let body = body_of([
                ("name", args.name.map(Value::from)),
                ("pos", args.pos.map(Value::from)),
            ]);
            TrelloRequest::put(
                format!("/checklists/{checklist_id}"),
                non_empty_update(body)?,
            )
        }
        TrelloTool::DeleteChecklist => {
            let args: DeleteChecklistTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            TrelloRequest::delete(format!("/checklists/{checklist_id}"))
        }
        TrelloTool::AddCheckitem => {
            let args: AddCheckitemTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            let body = body_of([
                ("name", Some(required_text("name", args.name)?.into())),
                ("checked", Some(args.checked.unwrap_or(false).into())),
                ("pos", args.pos.map(Value::from)),
            ]);
            TrelloRequest::post(
                format!("/checklists/{checklist_id}/checkItems"),
                Value::Object(body),
            )
        }
        TrelloTool::UpdateCheckitem => {
            let args: UpdateCheckitemTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            let checkitem_id = trello_id("checkitem_id", &args.checkitem_id)?;
            let body = body_of([
                ("name", args.name.map(Value::from)),
                ("checked", args.checked.map(Value::from)),
                ("pos", args.pos.map(Value::from)),
            ]);
            TrelloRequest::put(
                format!("/checklists/{checklist_id}/checkItems/{checkitem_id}"),
                non_empty_update(body)?,
            )
        }
        TrelloTool::DeleteCheckitem => {
            let args: DeleteCheckitemTool = parse_arguments(arguments)?;
            let checklist_id = trello_id("checklist_id", &args.checklist_id)?;
            let checkitem_id = trello_id("checkitem_id", &args.checkitem_id)?;
            TrelloRequest::delete(format!(
                "/checklists/{checklist_id}/checkItems/{checkitem_id}"
            ))
        }
    };

    Ok(request)
}

fn upstream_failure(tool: &str, err: TrelloError) -> ToolError {
    warn!(tool, error = %err, "trello call failed");
    ToolError::soft(format!("Trello API error: {err}"))
}

pub struct TrelloToolbox {
    table: ToolTable<TrelloTool>,
    client: Arc<dyn TrelloApi>,
}

impl TrelloToolbox {
    pub fn new(client: Arc<dyn TrelloApi>) -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
            client,
        })
    }

    async fn run(
        &self,
        name: &str,
        tool: TrelloTool,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ToolError> {
        let request = plan_request(tool, arguments)?;
        let value = self
            .client
            .execute(request)
            .await
            .map_err(|err| upstream_failure(name, err))?;
        json_result(&value)
    }
}

#[async_trait]
impl Toolbox for TrelloToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    /// Trello calls use the configured member token; the caller id is unused.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let tool = self.table.resolve(name)?;
        finish_tool_call(self.run(name, tool, arguments).await)
    }
}
