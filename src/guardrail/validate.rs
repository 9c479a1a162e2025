//! Query Validation
//!
//! Fail-closed checks applied to every caller-supplied query before it gets
//! anywhere near a connection: single statement only, no write/DDL keywords,
//! SELECT/WITH shapes only. A companion checker adds advisory lint notes
//! without executing or rewriting anything.

use regex::Regex;

/// Keywords that must never appear in a guarded query, matched
/// case-insensitively on word boundaries.
const DENYLIST: &str =
    r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|REPLACE|ATTACH|DETACH|VACUUM|PRAGMA)\b";

fn denylist_pattern() -> Regex {
    Regex::new(DENYLIST).expect("denylist pattern is valid")
}

/// Validate a query against the guardrail rules.
///
/// Returns `(ok, violations)`. When `allow_explain` is set, an
/// `EXPLAIN`-prefixed statement is also accepted; callers opt into that
/// only for plan inspection.
pub fn validate_query(sql: &str, allow_explain: bool) -> (bool, Vec<String>) {
    let mut violations: Vec<String> = Vec::new();

    if sql.trim().contains(';') {
        violations.push("Semicolons not allowed (single-statement only).".to_string());
    }

    if denylist_pattern().is_match(sql) {
        violations.push("Disallowed keyword detected (DML/DDL/PRAGMA/etc.).".to_string());
    }

    let s = sql.trim().to_lowercase();
    let allowed = s.starts_with("select")
        || s.starts_with("with")
        || (allow_explain && s.starts_with("explain"));
    if !allowed {
        violations.push("Only SELECT/WITH are allowed.".to_string());
    }

    (violations.is_empty(), violations)
}

/// Advisory checker output. `fixed_query` is always the input unchanged;
/// the checker never rewrites.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub fixed_query: String,
    pub notes: Vec<String>,
}

/// Run validation plus heuristic lint notes without executing the query.
pub fn check_query(_dialect: &str, sql: &str) -> CheckReport {
    let (ok, violations) = validate_query(sql, true);

    let mut notes: Vec<String> = Vec::new();
    if !ok {
        notes.extend(violations);
    }

    let lower = sql.to_lowercase();
    if lower.contains("select *") {
        notes.push("Consider selecting only relevant columns (avoid SELECT *).".to_string());
    }
    if lower.contains(" not in ") {
        notes.push("Check NOT IN vs NULL semantics for your dialect.".to_string());
    }

    CheckReport {
        fixed_query: sql.to_string(),
        notes,
    }
}

/// Matches an explicit `LIMIT <n>` anywhere in the query text. Heuristic:
/// a LIMIT inside a subquery also counts, so such queries are left unwrapped.
fn has_explicit_limit(sql: &str) -> bool {
    Regex::new(r"(?i)\blimit\s+\d+\b")
        .expect("limit pattern is valid")
        .is_match(sql)
}

/// Wrap a query as a bounded subquery unless it already carries a LIMIT.
///
/// Wrapping as a subquery (rather than splicing text onto the end) keeps
/// queries with trailing comments or CTEs intact.
pub fn wrap_with_limit(sql: &str, row_limit: usize) -> String {
    if row_limit == 0 || has_explicit_limit(sql) {
        return sql.to_string();
    }
    format!("SELECT * FROM ({}) __sub LIMIT {}", sql, row_limit)
}
