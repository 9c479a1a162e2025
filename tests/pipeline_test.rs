//! End-to-end pipeline test: a scripted inference client drives the full
//! four-stage graph against a real seeded KPI store, and the finished run
//! round-trips through the run store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::watch;

use consilium::graph::{ConversationState, GraphEngine, Next, PipelineGraph, RunStatus, StageNode};
use consilium::guardrail::ReadOnlyStore;
use consilium::state::RunStore;
use consilium::tools::sql::{SqlQueryTool, SqlTablesTool};
use consilium::tools::ToolRegistry;
use consilium::types::{
    ChatMessage, ChatRole, InferenceClient, InferenceOptions, InferenceResponse, TokenUsage,
    ToolRequest,
};

struct ScriptedClient {
    responses: Mutex<Vec<ChatMessage>>,
}

impl ScriptedClient {
    fn new(mut responses: Vec<ChatMessage>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn chat(
        &self,
        _messages: Vec<ChatMessage>,
        _options: Option<InferenceOptions>,
    ) -> anyhow::Result<InferenceResponse> {
        let message = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
        Ok(InferenceResponse {
            id: "resp".to_string(),
            model: "scripted".to_string(),
            message,
            usage: TokenUsage::default(),
            finish_reason: "stop".to_string(),
        })
    }
}

fn request(id: &str, name: &str, args: serde_json::Value) -> ToolRequest {
    ToolRequest {
        correlation_id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }
}

fn seeded_store(dir: &tempfile::TempDir) -> Arc<ReadOnlyStore> {
    let path = dir.path().join("company_data.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE monthly_kpis (month TEXT PRIMARY KEY, cost_to_serve REAL, revenue REAL);
         INSERT INTO monthly_kpis VALUES ('2025-01-01', 120.5, 900.0);
         INSERT INTO monthly_kpis VALUES ('2025-02-01', 118.2, 930.0);
         INSERT INTO monthly_kpis VALUES ('2025-03-01', 115.9, 955.0);",
    )
    .unwrap();
    drop(conn);
    Arc::new(ReadOnlyStore::open(path.to_str().unwrap()).unwrap())
}

fn stage(name: &str, client: Arc<dyn InferenceClient>, tools: &[&str], next: Next) -> StageNode {
    StageNode {
        name: name.to_string(),
        instruction: format!("You are the {name} stage."),
        client,
        allowed_tools: tools.iter().map(|t| t.to_string()).collect(),
        next,
    }
}

#[tokio::test]
async fn test_full_run_over_seeded_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SqlTablesTool::new(store.clone())));
    registry.register(Arc::new(SqlQueryTool::new(store, 100)));

    // baseline: list tables, query KPIs, then summarize
    let baseline = ScriptedClient::new(vec![
        ChatMessage::assistant("", Some(vec![request("tc_1", "sql_tables", json!({}))])),
        ChatMessage::assistant(
            "",
            Some(vec![request(
                "tc_2",
                "sql_query",
                json!({ "query": "SELECT month, cost_to_serve FROM monthly_kpis" }),
            )]),
        ),
        ChatMessage::assistant("Cost to serve fell from 120.5 to 115.9 over Q1.", None),
    ]);
    // plan: one toolless turn
    let plan = ScriptedClient::new(vec![ChatMessage::assistant(
        "Target a further 5% reduction by renegotiating carrier contracts.",
        None,
    )]);

    let graph = PipelineGraph::new(
        vec![
            stage(
                "baseline",
                baseline,
                &["sql_tables", "sql_query"],
                Next::Stage("plan".to_string()),
            ),
            stage("plan", plan, &[], Next::End),
        ],
        "baseline",
    )
    .unwrap();

    let engine = GraphEngine::new(registry, Duration::from_secs(5), 8, None);
    let cancel = watch::channel(false).1;
    let report = engine
        .run(
            &graph,
            ConversationState::with_goal("reduce cost to serve"),
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.caveats.is_empty());

    // transcript: user, assistant+tool, tool, assistant+tool, tool,
    // assistant summary, assistant plan
    let roles: Vec<ChatRole> = report
        .state
        .messages()
        .iter()
        .map(|m| m.role.clone())
        .collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::Tool,
            ChatRole::Assistant,
            ChatRole::Tool,
            ChatRole::Assistant,
            ChatRole::Assistant,
        ]
    );

    // the query outcome carried real rows from the store
    let query_result = &report.state.messages()[4];
    assert!(query_result.content.contains("\"ok\":true"));
    assert!(query_result.content.contains("cost_to_serve"));
    assert!(query_result.content.contains("120.5"));

    assert_eq!(
        report.state.scratch("plan"),
        Some("Target a further 5% reduction by renegotiating carrier contracts.")
    );

    // persist and read back
    let mut runs = RunStore::open_in_memory().unwrap();
    runs.insert_run("run_1", "reduce cost to serve", "2026-08-25T10:00:00Z")
        .unwrap();
    runs.finish_run("run_1", &report, "2026-08-25T10:02:00Z")
        .unwrap();

    let record = runs.get_run("run_1").unwrap().unwrap();
    assert_eq!(record.status, Some(RunStatus::Completed));
    let messages = runs.get_messages("run_1").unwrap();
    assert_eq!(messages.len(), report.state.len());
    assert_eq!(
        runs.get_scratch("run_1", "plan").unwrap().as_deref(),
        Some("Target a further 5% reduction by renegotiating carrier contracts.")
    );
}

#[tokio::test]
async fn test_rejected_write_query_surfaces_in_transcript_not_as_abort() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SqlQueryTool::new(store, 100)));

    let client = ScriptedClient::new(vec![
        ChatMessage::assistant(
            "",
            Some(vec![request(
                "tc_1",
                "sql_query",
                json!({ "query": "DELETE FROM monthly_kpis" }),
            )]),
        ),
        ChatMessage::assistant("The store rejected the write, as expected.", None),
    ]);

    let graph = PipelineGraph::new(
        vec![stage("baseline", client, &["sql_query"], Next::End)],
        "baseline",
    )
    .unwrap();

    let engine = GraphEngine::new(registry, Duration::from_secs(5), 8, None);
    let report = engine
        .run(
            &graph,
            ConversationState::with_goal("goal"),
            watch::channel(false).1,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    // the guardrail refusal is data, not a tool error
    assert!(report.caveats.is_empty());
    let outcome = &report.state.messages()[2];
    assert_eq!(outcome.role, ChatRole::Tool);
    assert!(outcome.content.contains("validation_failed"));
}
