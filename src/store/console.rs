//! Raw read-intent query console.
//!
//! The keyword blocklist is a best-effort filter, not a sound read-only
//! guarantee: CTE writes or pragmas slip through by construction.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, SqlitePool, TypeInfo, ValueRef};

use super::Result;

/// Case-insensitive substrings that reject a console query.
pub const BLOCKED_KEYWORDS: [&str; 5] = ["insert", "update", "delete", "drop", "alter"];

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub execution_time_ms: f64,
}

/// Returns the first blocked keyword contained in `query`, if any.
pub fn blocked_keyword(query: &str) -> Option<&'static str> {
    let lower = query.to_lowercase();
    BLOCKED_KEYWORDS
        .iter()
        .copied()
        .find(|kw| lower.contains(kw))
}

pub async fn run_query(pool: &SqlitePool, query: &str) -> Result<QueryOutput> {
    let start = Instant::now();
    let rows = sqlx::query(query).fetch_all(pool).await?;
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;

    let columns: Vec<String> = match rows.first() {
        Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
        // no rows to read names from; ask the prepared statement instead
        None => pool
            .describe(query)
            .await?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };
    let rows = rows.iter().map(|r| row_to_json(r, &columns)).collect();

    Ok(QueryOutput {
        columns,
        rows,
        execution_time_ms: (elapsed * 100.0).round() / 100.0,
    })
}

fn row_to_json(row: &SqliteRow, columns: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for (idx, name) in columns.iter().enumerate() {
        out.insert(name.clone(), cell(row, idx));
    }
    out
}

fn cell(row: &SqliteRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|b| Value::from(format!("<{} bytes>", b.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}
