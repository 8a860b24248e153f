//! Knowledge-graph memory tools
//!
//! Each caller owns one graph stored under `memory:<caller>`. Every call is a
//! single read, or a single read-modify-write, of that record.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{
    finish_tool_call, json_result, parse_arguments, CallerId, ToolError, ToolKind, ToolTable,
    Toolbox,
};
use crate::errors::AppError;
use crate::storage::{storage_key, RecordStore};

pub const MEMORY_NAMESPACE: &str = "memory";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, macros::JsonSchema)]
pub struct EntityInput {
    /// Unique entity name
    pub name: String,
    pub entity_type: String,
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, macros::JsonSchema)]
pub struct Relation {
    pub from: String,
    pub to: String,
    /// Relation in active voice, e.g. `works_at`
    pub relation_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, macros::JsonSchema)]
pub struct ObservationInput {
    pub entity_name: String,
    pub contents: Vec<String>,
}

#[macros::mcp_tool(
    name = "create_entities",
    description = "Create entities in the knowledge graph; existing names are skipped"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateEntitiesTool {
    pub entities: Vec<EntityInput>,
}

#[macros::mcp_tool(
    name = "create_relations",
    description = "Create directed relations between entities; duplicates are skipped"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateRelationsTool {
    pub relations: Vec<Relation>,
}

#[macros::mcp_tool(
    name = "add_observations",
    description = "Append observations to existing entities"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddObservationsTool {
    pub observations: Vec<ObservationInput>,
}

#[macros::mcp_tool(
    name = "delete_entities",
    description = "Delete entities and every relation that references them"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct DeleteEntitiesTool {
    pub entity_names: Vec<String>,
}

#[macros::mcp_tool(name = "read_graph", description = "Read the whole knowledge graph")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ReadGraphTool {}

#[macros::mcp_tool(
    name = "search_nodes",
    description = "Search entities by name, type or observation text"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchNodesTool {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AddedObservations {
    pub entity_name: String,
    pub added: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeletionSummary {
    pub deleted_entities: Vec<String>,
    pub deleted_relations: usize,
}

impl KnowledgeGraph {
    pub fn create_entities(&mut self, inputs: Vec<EntityInput>) -> Vec<Entity> {
        let mut created = Vec::new();
        for input in inputs {
            if self.entities.contains_key(&input.name) {
                continue;
            }
            let entity = Entity {
                name: input.name.clone(),
                entity_type: input.entity_type,
                observations: dedup_preserving_order(input.observations),
            };
            self.entities.insert(input.name, entity.clone());
            created.push(entity);
        }
        created
    }

    pub fn create_relations(&mut self, inputs: Vec<Relation>) -> Vec<Relation> {
        let mut created = Vec::new();
        for relation in inputs {
            if self.relations.contains(&relation) {
                continue;
            }
            self.relations.push(relation.clone());
            created.push(relation);
        }
        created
    }

    /// Fails without modifying the graph when any target entity is missing.
    pub fn add_observations(
        &mut self,
        inputs: Vec<ObservationInput>,
    ) -> Result<Vec<AddedObservations>, String> {
        if let Some(missing) = inputs
            .iter()
            .find(|input| !self.entities.contains_key(&input.entity_name))
        {
            return Err(format!("entity not found: {}", missing.entity_name));
        }

        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(entity) = self.entities.get_mut(&input.entity_name) else {
                continue;
            };
            let mut added = Vec::new();
            for content in input.contents {
                if !entity.observations.contains(&content) {
                    entity.observations.push(content.clone());
                    added.push(content);
                }
            }
            results.push(AddedObservations {
                entity_name: input.entity_name,
                added,
            });
        }
        Ok(results)
    }

    pub fn delete_entities(&mut self, names: &[String]) -> DeletionSummary {
        let deleted_entities = names
            .iter()
            .filter(|name| self.entities.remove(name.as_str()).is_some())
            .cloned()
            .collect::<Vec<_>>();

        let before = self.relations.len();
        self.relations
            .retain(|relation| !names.contains(&relation.from) && !names.contains(&relation.to));

        DeletionSummary {
            deleted_entities,
            deleted_relations: before - self.relations.len(),
        }
    }

    /// Case-insensitive match on name, type and observations. Relations are
    /// kept when both ends matched.
    pub fn search(&self, query: &str) -> KnowledgeGraph {
        let needle = query.trim().to_lowercase();
        let entities = self
            .entities
            .iter()
            .filter(|(_, entity)| {
                entity.name.to_lowercase().contains(&needle)
                    || entity.entity_type.to_lowercase().contains(&needle)
                    || entity
                        .observations
                        .iter()
                        .any(|observation| observation.to_lowercase().contains(&needle))
            })
            .map(|(name, entity)| (name.clone(), entity.clone()))
            .collect::<BTreeMap<_, _>>();

        let relations = self
            .relations
            .iter()
            .filter(|relation| {
                entities.contains_key(&relation.from) && entities.contains_key(&relation.to)
            })
            .cloned()
            .collect();

        KnowledgeGraph {
            entities,
            relations,
        }
    }
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTool {
    CreateEntities,
    CreateRelations,
    AddObservations,
    DeleteEntities,
    ReadGraph,
    SearchNodes,
}

impl ToolKind for MemoryTool {
    const ALL: &'static [Self] = &[
        Self::CreateEntities,
        Self::CreateRelations,
        Self::AddObservations,
        Self::DeleteEntities,
        Self::ReadGraph,
        Self::SearchNodes,
    ];

    fn descriptor(self) -> Tool {
        match self {
            Self::CreateEntities => CreateEntitiesTool::tool(),
            Self::CreateRelations => CreateRelationsTool::tool(),
            Self::AddObservations => AddObservationsTool::tool(),
            Self::DeleteEntities => DeleteEntitiesTool::tool(),
            Self::ReadGraph => ReadGraphTool::tool(),
            Self::SearchNodes => SearchNodesTool::tool(),
        }
    }
}

pub struct MemoryToolbox {
    table: ToolTable<MemoryTool>,
    store: RecordStore,
}

impl MemoryToolbox {
    pub fn new(store: RecordStore) -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
            store,
        })
    }

    async fn run(
        &self,
        tool: MemoryTool,
        arguments: Map<String, Value>,
        caller: &CallerId,
    ) -> Result<CallToolResult, ToolError> {
        let key = storage_key(MEMORY_NAMESPACE, caller.as_str(), None);

        match tool {
            MemoryTool::CreateEntities => {
                let args: CreateEntitiesTool = parse_arguments(arguments)?;
                let created = self
                    .store
                    .update(&key, |graph: &mut KnowledgeGraph| {
                        Ok::<_, ToolError>(graph.create_entities(args.entities))
                    })
                    .await?;
                json_result(&json!({ "created": created }))
            }
            MemoryTool::CreateRelations => {
                let args: CreateRelationsTool = parse_arguments(arguments)?;
                let created = self
                    .store
                    .update(&key, |graph: &mut KnowledgeGraph| {
                        Ok::<_, ToolError>(graph.create_relations(args.relations))
                    })
                    .await?;
                json_result(&json!({ "created": created }))
            }
            MemoryTool::AddObservations => {
                let args: AddObservationsTool = parse_arguments(arguments)?;
                let added = self
                    .store
                    .update(&key, |graph: &mut KnowledgeGraph| {
                        graph
                            .add_observations(args.observations)
                            .map_err(ToolError::Soft)
                    })
                    .await?;
                json_result(&json!({ "added": added }))
            }
            MemoryTool::DeleteEntities => {
                let args: DeleteEntitiesTool = parse_arguments(arguments)?;
                let summary = self
                    .store
                    .update(&key, |graph: &mut KnowledgeGraph| {
                        Ok::<_, ToolError>(graph.delete_entities(&args.entity_names))
                    })
                    .await?;
                json_result(&summary)
            }
            MemoryTool::ReadGraph => {
                let _: ReadGraphTool = parse_arguments(arguments)?;
                let graph = self.load_graph(&key).await?;
                json_result(&graph)
            }
            MemoryTool::SearchNodes => {
                let args: SearchNodesTool = parse_arguments(arguments)?;
                let graph = self.load_graph(&key).await?;
                json_result(&graph.search(&args.query))
            }
        }
    }

    async fn load_graph(&self, key: &str) -> Result<KnowledgeGraph, ToolError> {
        Ok(self
            .store
            .load::<KnowledgeGraph>(key)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl Toolbox for MemoryToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let tool = self.table.resolve(name)?;
        finish_tool_call(self.run(tool, arguments, caller).await)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::storage::{tests::SlowKvStore, UpdatePolicy};

    fn entity(name: &str, entity_type: &str) -> EntityInput {
        EntityInput {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations: vec![format!("{name} exists")],
        }
    }

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    fn caller(name: &str) -> CallerId {
        CallerId::parse(name).expect("caller")
    }

    fn result_json(result: &CallToolResult) -> Value {
        serde_json::to_value(result).expect("serialize result")
    }

    #[test]
    fn create_entities_on_empty_graph_inserts_each_name() {
        let mut graph = KnowledgeGraph::default();
        let inputs = vec![
            entity("Ada", "person"),
            entity("Analytical Engine", "machine"),
            entity("London", "city"),
        ];

        let created = graph.create_entities(inputs.clone());

        assert_eq!(created.len(), 3);
        assert_eq!(graph.entities.len(), 3);
        for input in &inputs {
            assert_eq!(graph.entities[&input.name].name, input.name);
        }
    }

    #[test]
    fn create_entities_skips_existing_names() {
        let mut graph = KnowledgeGraph::default();
        graph.create_entities(vec![entity("Ada", "person")]);

        let created = graph.create_entities(vec![entity("Ada", "robot"), entity("Bob", "person")]);

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "Bob");
        assert_eq!(graph.entities["Ada"].entity_type, "person");
    }

    #[test]
    fn add_observations_to_missing_entity_changes_nothing() {
        let mut graph = KnowledgeGraph::default();
        graph.create_entities(vec![entity("Ada", "person")]);
        let before = graph.clone();

        let err = graph
            .add_observations(vec![
                ObservationInput {
                    entity_name: "Ada".to_string(),
                    contents: vec!["wrote notes".to_string()],
                },
                ObservationInput {
                    entity_name: "Ghost".to_string(),
                    contents: vec!["boo".to_string()],
                },
            ])
            .expect_err("missing entity");

        assert!(err.contains("Ghost"));
        assert_eq!(graph, before);
    }

    #[test]
    fn delete_entities_cascades_relations() {
        let mut graph = KnowledgeGraph::default();
        graph.create_entities(vec![
            entity("Ada", "person"),
            entity("Bob", "person"),
            entity("Carol", "person"),
        ]);
        graph.create_relations(vec![
            Relation {
                from: "Ada".to_string(),
                to: "Bob".to_string(),
                relation_type: "knows".to_string(),
            },
            Relation {
                from: "Bob".to_string(),
                to: "Carol".to_string(),
                relation_type: "knows".to_string(),
            },
        ]);

        let summary = graph.delete_entities(&["Ada".to_string(), "Nobody".to_string()]);

        assert_eq!(summary.deleted_entities, vec!["Ada".to_string()]);
        assert_eq!(summary.deleted_relations, 1);
        assert_eq!(graph.relations.len(), 1);
    }

    #[test]
    fn search_matches_observations_case_insensitively() {
        let mut graph = KnowledgeGraph::default();
        graph.create_entities(vec![
            EntityInput {
                name: "Ada".to_string(),
                entity_type: "person".to_string(),
                observations: vec!["Wrote the first PROGRAM".to_string()],
            },
            entity("Bob", "person"),
        ]);

        let found = graph.search("program");

        assert_eq!(found.entities.len(), 1);
        assert!(found.entities.contains_key("Ada"));
    }

    #[tokio::test]
    async fn graphs_are_scoped_per_caller() {
        let toolbox = MemoryToolbox::new(RecordStore::in_memory()).expect("toolbox");

        toolbox
            .call_tool(
                "create_entities",
                arguments(json!({ "entities": [
                    { "name": "Ada", "entity_type": "person", "observations": [] }
                ]})),
                &caller("alice"),
            )
            .await
            .expect("create");

        let alice = toolbox
            .call_tool("read_graph", Map::new(), &caller("alice"))
            .await
            .expect("alice graph");
        let bob = toolbox
            .call_tool("read_graph", Map::new(), &caller("bob"))
            .await
            .expect("bob graph");

        assert!(result_json(&alice)["structuredContent"]["entities"]["Ada"].is_object());
        assert_eq!(
            result_json(&bob)["structuredContent"]["entities"],
            json!({})
        );
    }

    #[tokio::test]
    async fn missing_entity_is_a_soft_error() {
        let toolbox = MemoryToolbox::new(RecordStore::in_memory()).expect("toolbox");

        let result = toolbox
            .call_tool(
                "add_observations",
                arguments(json!({ "observations": [
                    { "entity_name": "Ghost", "contents": ["boo"] }
                ]})),
                &caller("alice"),
            )
            .await
            .expect("soft error is still a result");

        let value = result_json(&result);
        assert_eq!(value["isError"], true);
        assert!(value["content"][0]["text"]
            .as_str()
            .expect("text")
            .contains("Ghost"));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let toolbox = MemoryToolbox::new(RecordStore::in_memory()).expect("toolbox");

        let err = toolbox
            .call_tool("drop_database", Map::new(), &caller("alice"))
            .await
            .expect_err("unknown tool");
        assert!(matches!(err, AppError::ToolNotFound { .. }));
    }

    async fn concurrent_creates(policy: UpdatePolicy) -> usize {
        let store = RecordStore::new(
            Arc::new(SlowKvStore::new(Duration::from_millis(20))),
            policy,
        );
        let toolbox = MemoryToolbox::new(store).expect("toolbox");
        let alice = caller("alice");

        let create = |name: &'static str| {
            toolbox.call_tool(
                "create_entities",
                arguments(json!({ "entities": [
                    { "name": name, "entity_type": "person", "observations": [] }
                ]})),
                &alice,
            )
        };
        let (first, second) = tokio::join!(create("Ada"), create("Bob"));
        first.expect("first create");
        second.expect("second create");

        let graph = toolbox
            .load_graph(&storage_key(MEMORY_NAMESPACE, "alice", None))
            .await
            .expect("graph");
        graph.entities.len()
    }

    #[tokio::test]
    async fn concurrent_creates_lose_a_write_without_serialization() {
        assert_eq!(concurrent_creates(UpdatePolicy::Unsynchronized).await, 1);
    }

    #[tokio::test]
    async fn concurrent_creates_keep_both_writes_when_serialized() {
        assert_eq!(concurrent_creates(UpdatePolicy::Serialized).await, 2);
    }
}
