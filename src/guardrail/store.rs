//! Read-Only Store
//!
//! Executes guarded queries against a SQLite file opened strictly
//! read-only/immutable. Connections are opened per operation, so any number
//! of concurrent runs can share one store with no locking.

use std::collections::BTreeMap;
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::GuardrailError;

use super::validate::{validate_query, wrap_with_limit};

/// One bounded query result. `rows` are column→value mappings; `columns`
/// carries the result-set column order.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
    pub notnull: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub pk: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub samples: Vec<Map<String, Value>>,
}

/// Handle to the guarded SQLite file. Holds only the URI; every operation
/// opens its own read-only connection.
pub struct ReadOnlyStore {
    uri: String,
}

impl ReadOnlyStore {
    /// Open a store over an existing SQLite file. The file is never written:
    /// the URI pins `mode=ro&immutable=1` and connections add
    /// `SQLITE_OPEN_READ_ONLY`.
    pub fn open(db_path: &str) -> Result<Self, GuardrailError> {
        let abs = std::fs::canonicalize(db_path).map_err(|e| GuardrailError::Unavailable {
            message: format!("{}: {}", db_path, e),
        })?;
        Ok(ReadOnlyStore {
            uri: format!("file:{}?mode=ro&immutable=1", abs.display()),
        })
    }

    fn connect(&self) -> Result<Connection, GuardrailError> {
        Connection::open_with_flags(
            &self.uri,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| GuardrailError::Unavailable {
            message: e.to_string(),
        })
    }

    /// Validate and execute a single read-only query.
    ///
    /// Queries lacking an explicit `LIMIT` are wrapped as a bounded subquery
    /// with `row_limit` before running, so unbounded result sets can never
    /// escape this boundary. Named parameters use the `:name` form.
    pub fn execute(
        &self,
        query: &str,
        params: &Map<String, Value>,
        row_limit: usize,
    ) -> Result<QueryResult, GuardrailError> {
        let (ok, violations) = validate_query(query, false);
        if !ok {
            return Err(GuardrailError::Validation { violations });
        }

        let bounded = wrap_with_limit(query, row_limit);
        let started = Instant::now();
        let conn = self.connect()?;

        let (columns, rows) = run_select(&conn, &bounded, params).map_err(|e| {
            GuardrailError::Execution {
                message: e.to_string(),
            }
        })?;

        let row_count = rows.len();
        Ok(QueryResult {
            columns,
            rows,
            row_count,
            truncated: row_limit > 0 && row_count >= row_limit,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// List table names, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>, GuardrailError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .map_err(execution_error)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(execution_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(execution_error)?;
        Ok(names)
    }

    /// Schema info (DDL + columns) and up to `sample_rows` sample rows for
    /// each requested table. Unknown table names are silently skipped; with
    /// `sample_rows = 0` the output is a pure function of the schema.
    pub fn schema(
        &self,
        tables: Option<&[String]>,
        sample_rows: usize,
    ) -> Result<BTreeMap<String, TableSchema>, GuardrailError> {
        let all_tables = self.list_tables()?;
        let targets: Vec<&String> = match tables {
            Some(requested) => all_tables
                .iter()
                .filter(|t| requested.contains(t))
                .collect(),
            None => all_tables.iter().collect(),
        };

        let conn = self.connect()?;
        let mut out = BTreeMap::new();
        for table in targets {
            let ddl: Option<String> = conn
                .query_row(
                    "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or(None);

            let escaped = table.replace('\'', "''");
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info('{}')", escaped))
                .map_err(execution_error)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        cid: row.get(0)?,
                        name: row.get(1)?,
                        col_type: row.get(2)?,
                        notnull: row.get::<_, i64>(3)? != 0,
                        default: row.get(4)?,
                        pk: row.get::<_, i64>(5)? != 0,
                    })
                })
                .map_err(execution_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(execution_error)?;

            let samples = if sample_rows > 0 {
                let sample_sql = format!(
                    "SELECT * FROM \"{}\" LIMIT {}",
                    table.replace('"', "\"\""),
                    sample_rows
                );
                match run_select(&conn, &sample_sql, &Map::new()) {
                    Ok((_, rows)) => rows,
                    Err(e) => {
                        let mut err_row = Map::new();
                        err_row.insert("error".to_string(), Value::String(e.to_string()));
                        vec![err_row]
                    }
                }
            } else {
                Vec::new()
            };

            out.insert(
                table.clone(),
                TableSchema {
                    ddl,
                    columns,
                    samples,
                },
            );
        }
        Ok(out)
    }

    /// Return the `EXPLAIN QUERY PLAN` rows for a SELECT/WITH query.
    /// This is the only path that accepts `explain`-shaped input.
    pub fn explain(&self, query: &str) -> Result<Vec<Value>, GuardrailError> {
        let (ok, violations) = validate_query(query, true);
        if !ok {
            return Err(GuardrailError::Validation { violations });
        }

        let conn = self.connect()?;
        let plan_sql = format!("EXPLAIN QUERY PLAN {}", query);
        let (_, rows) = run_select(&conn, &plan_sql, &Map::new()).map_err(execution_error)?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }
}

fn execution_error(e: rusqlite::Error) -> GuardrailError {
    GuardrailError::Execution {
        message: e.to_string(),
    }
}

/// Prepare, bind, and drain a statement into (columns, rows).
fn run_select(
    conn: &Connection,
    sql: &str,
    params: &Map<String, Value>,
) -> rusqlite::Result<(Vec<String>, Vec<Map<String, Value>>)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let bound: Vec<(String, rusqlite::types::Value)> = params
        .iter()
        .map(|(k, v)| {
            let key = if k.starts_with(':') {
                k.clone()
            } else {
                format!(":{}", k)
            };
            (key, json_to_sql(v))
        })
        .collect();
    let bound_refs: Vec<(&str, &dyn rusqlite::ToSql)> = bound
        .iter()
        .map(|(k, v)| (k.as_str(), v as &dyn rusqlite::ToSql))
        .collect();

    let mut rows_out: Vec<Map<String, Value>> = Vec::new();
    let mut rows = stmt.query(bound_refs.as_slice())?;
    while let Some(row) = rows.next()? {
        let mut out = Map::new();
        for (i, col) in columns.iter().enumerate() {
            out.insert(col.clone(), sql_to_json(row.get_ref(i)?));
        }
        rows_out.push(out);
    }
    Ok((columns, rows_out))
}

fn json_to_sql(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seed a KPI store with 20 monthly rows and open it read-only.
    fn seeded_store() -> (tempfile::TempDir, ReadOnlyStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("company_data.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE monthly_kpis (
                 month TEXT NOT NULL PRIMARY KEY,
                 cost_to_serve REAL,
                 revenue REAL
             );",
        )
        .unwrap();
        for i in 1..=20 {
            conn.execute(
                "INSERT INTO monthly_kpis (month, cost_to_serve, revenue)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    format!("2025-{:02}-01", i),
                    100.0 + i as f64,
                    1000.0 * i as f64
                ],
            )
            .unwrap();
        }
        drop(conn);
        let store = ReadOnlyStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_validation_failure_never_touches_connection() {
        // Store pointed at a path that cannot be opened: if validation did
        // not fail closed, execute would surface Unavailable instead.
        let store = ReadOnlyStore {
            uri: "file:/nonexistent/never.db?mode=ro&immutable=1".to_string(),
        };
        let err = store
            .execute("DROP TABLE monthly_kpis", &Map::new(), 10)
            .unwrap_err();
        assert!(matches!(err, GuardrailError::Validation { .. }));
    }

    #[test]
    fn test_row_cap_applied_and_truncated_flag() {
        let (_dir, store) = seeded_store();
        let result = store
            .execute(
                "SELECT month, cost_to_serve FROM monthly_kpis WHERE month >= '2025-01-01'",
                &Map::new(),
                5,
            )
            .unwrap();
        assert_eq!(result.row_count, 5);
        assert!(result.truncated);
        assert_eq!(result.columns, vec!["month", "cost_to_serve"]);
    }

    #[test]
    fn test_small_result_not_truncated() {
        let (_dir, store) = seeded_store();
        let result = store
            .execute(
                "SELECT month FROM monthly_kpis WHERE month = '2025-03-01'",
                &Map::new(),
                5,
            )
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert!(!result.truncated);
    }

    #[test]
    fn test_explicit_limit_left_unwrapped() {
        let (_dir, store) = seeded_store();
        let result = store
            .execute("SELECT month FROM monthly_kpis LIMIT 3", &Map::new(), 100)
            .unwrap();
        assert_eq!(result.row_count, 3);
        assert!(!result.truncated);
    }

    #[test]
    fn test_named_params() {
        let (_dir, store) = seeded_store();
        let mut params = Map::new();
        params.insert("m".to_string(), Value::String("2025-10-01".to_string()));
        let result = store
            .execute(
                "SELECT revenue FROM monthly_kpis WHERE month = :m",
                &params,
                10,
            )
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["revenue"], Value::from(10_000.0));
    }

    #[test]
    fn test_runtime_error_is_verbatim() {
        let (_dir, store) = seeded_store();
        let err = store
            .execute("SELECT no_such_column FROM monthly_kpis", &Map::new(), 10)
            .unwrap_err();
        match err {
            GuardrailError::Execution { message } => {
                assert!(message.contains("no_such_column"), "got: {message}");
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_list_tables() {
        let (_dir, store) = seeded_store();
        assert_eq!(store.list_tables().unwrap(), vec!["monthly_kpis"]);
    }

    #[test]
    fn test_schema_idempotent_without_samples() {
        let (_dir, store) = seeded_store();
        let requested = vec!["monthly_kpis".to_string()];
        let first = store.schema(Some(&requested), 0).unwrap();
        let second = store.schema(Some(&requested), 0).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let table = &first["monthly_kpis"];
        assert!(table.ddl.as_deref().unwrap().contains("monthly_kpis"));
        assert_eq!(table.columns.len(), 3);
        assert!(table.columns[0].pk);
        assert!(table.samples.is_empty());
    }

    #[test]
    fn test_schema_samples() {
        let (_dir, store) = seeded_store();
        let schema = store.schema(None, 3).unwrap();
        assert_eq!(schema["monthly_kpis"].samples.len(), 3);
    }

    #[test]
    fn test_explain_plan() {
        let (_dir, store) = seeded_store();
        let plan = store
            .explain("SELECT month FROM monthly_kpis WHERE month = '2025-01-01'")
            .unwrap();
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_explain_rejects_denylist() {
        let (_dir, store) = seeded_store();
        let err = store.explain("DELETE FROM monthly_kpis").unwrap_err();
        assert!(matches!(err, GuardrailError::Validation { .. }));
    }
}
