//! SQL Tools
//!
//! Tool adapters over the query guardrail. Validation and runtime failures
//! are returned as `ok:false` payloads so the calling stage can revise the
//! query and resubmit; only infrastructure faults (store unreachable)
//! surface as tool errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::GuardrailError;
use crate::guardrail::{check_query, ReadOnlyStore};
use crate::types::PipelineTool;

fn failure_payload(err: GuardrailError) -> anyhow::Result<Value> {
    match err {
        GuardrailError::Validation { violations } => Ok(json!({
            "ok": false,
            "error": "validation_failed",
            "details": violations,
        })),
        GuardrailError::Execution { message } => Ok(json!({
            "ok": false,
            "error": "execution_error",
            "message": message,
        })),
        err @ GuardrailError::Unavailable { .. } => Err(err.into()),
    }
}

// ─── sql_query ───────────────────────────────────────────────────

pub struct SqlQueryTool {
    store: Arc<ReadOnlyStore>,
    row_limit: usize,
}

impl SqlQueryTool {
    pub fn new(store: Arc<ReadOnlyStore>, row_limit: usize) -> Self {
        Self { store, row_limit }
    }
}

#[async_trait]
impl PipelineTool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Execute a single read-only SELECT/WITH query against the company KPI store. \
         Use :name parameters. Results are capped; truncated=true means more rows exist."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "A single SELECT/WITH statement" },
                "params": { "type": "object", "description": "Named :param bindings" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let params: Map<String, Value> = args["params"].as_object().cloned().unwrap_or_default();

        match self.store.execute(query, &params, self.row_limit) {
            Ok(result) => Ok(json!({
                "ok": true,
                "cols": result.columns,
                "rows": result.rows,
                "row_count": result.row_count,
                "duration_ms": result.duration_ms,
                "truncated": result.truncated,
            })),
            Err(err) => failure_payload(err),
        }
    }
}

// ─── sql_tables ──────────────────────────────────────────────────

pub struct SqlTablesTool {
    store: Arc<ReadOnlyStore>,
}

impl SqlTablesTool {
    pub fn new(store: Arc<ReadOnlyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineTool for SqlTablesTool {
    fn name(&self) -> &str {
        "sql_tables"
    }

    fn description(&self) -> &str {
        "List the table names in the company KPI store."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
        match self.store.list_tables() {
            Ok(tables) => Ok(json!({ "tables": tables })),
            Err(err) => failure_payload(err),
        }
    }
}

// ─── sql_schema ──────────────────────────────────────────────────

pub struct SqlSchemaTool {
    store: Arc<ReadOnlyStore>,
}

impl SqlSchemaTool {
    pub fn new(store: Arc<ReadOnlyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineTool for SqlSchemaTool {
    fn name(&self) -> &str {
        "sql_schema"
    }

    fn description(&self) -> &str {
        "Return DDL, column info, and sample rows for tables in the KPI store."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tables": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tables to describe (default: all)"
                },
                "sample_rows": { "type": "number", "description": "Sample rows per table (default: 3)" }
            }
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let tables: Option<Vec<String>> = args["tables"].as_array().map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        let sample_rows = args["sample_rows"].as_u64().unwrap_or(3) as usize;

        match self.store.schema(tables.as_deref(), sample_rows) {
            Ok(schema) => Ok(serde_json::to_value(schema)?),
            Err(err) => failure_payload(err),
        }
    }
}

// ─── sql_check ───────────────────────────────────────────────────

/// Advisory checker; validates and lints without executing.
pub struct SqlCheckTool;

#[async_trait]
impl PipelineTool for SqlCheckTool {
    fn name(&self) -> &str {
        "sql_check"
    }

    fn description(&self) -> &str {
        "Check a query before execution. Returns the query unchanged plus lint notes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "dialect": { "type": "string", "description": "SQL dialect (default: sqlite)" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let dialect = args["dialect"].as_str().unwrap_or("sqlite");

        let report = check_query(dialect, query);
        Ok(serde_json::to_value(report)?)
    }
}

// ─── sql_explain ─────────────────────────────────────────────────

pub struct SqlExplainTool {
    store: Arc<ReadOnlyStore>,
}

impl SqlExplainTool {
    pub fn new(store: Arc<ReadOnlyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineTool for SqlExplainTool {
    fn name(&self) -> &str {
        "sql_explain"
    }

    fn description(&self) -> &str {
        "Return the SQLite EXPLAIN QUERY PLAN rows for a SELECT/WITH query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;

        match self.store.explain(query) {
            Ok(plan) => Ok(json!({ "ok": true, "plan": plan })),
            Err(err) => failure_payload(err),
        }
    }
}
