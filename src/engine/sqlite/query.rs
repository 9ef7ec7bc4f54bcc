use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};

use super::params::Params;
use crate::engine::{BufferedRows, EngineError, QueryOutput};
use crate::types::{ExecResult, RowValues};

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `EngineError` if the value cannot be read.
pub fn extract_value(row: &Row<'_>, idx: usize) -> Result<RowValues, EngineError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Summary of a finished statement. The insert id is reported only when the statement moved
/// the session's last-insert rowid away from `rowid_before`.
fn exec_result(conn: &Connection, affected: usize, rowid_before: i64) -> ExecResult {
    let rowid = conn.last_insert_rowid();
    ExecResult::new(
        u64::try_from(affected).unwrap_or(u64::MAX),
        (affected > 0 && rowid != 0 && rowid != rowid_before).then_some(rowid),
    )
}

/// Run one statement query-style.
///
/// Statements without result columns are executed and reported through the marker row;
/// everything else is materialized, including an empty but correctly shaped result.
///
/// # Errors
/// Returns `EngineError` if preparing, binding or stepping the statement fails.
pub fn run_query(conn: &Connection, sql: &str, params: &Params) -> Result<QueryOutput, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        let rowid_before = conn.last_insert_rowid();
        let affected = stmt.execute(params_from_iter(params.as_values()))?;
        drop(stmt);
        return Ok(QueryOutput::ok_result(exec_result(conn, affected, rowid_before)));
    }

    let schema: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = schema.len();
    let mut rows_iter = stmt.query(params_from_iter(params.as_values()))?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(extract_value(row, i)?);
        }
        rows.push(values);
    }
    Ok(QueryOutput::new(schema, Box::new(BufferedRows::new(rows))))
}

/// Run one statement exec-style. Row-returning statements are drained and report zero rows.
///
/// # Errors
/// Returns `EngineError` if preparing, binding or stepping the statement fails.
pub fn run_exec(conn: &Connection, sql: &str, params: &Params) -> Result<ExecResult, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        let rowid_before = conn.last_insert_rowid();
        let affected = stmt.execute(params_from_iter(params.as_values()))?;
        drop(stmt);
        return Ok(exec_result(conn, affected, rowid_before));
    }
    let mut rows = stmt.query(params_from_iter(params.as_values()))?;
    while rows.next()?.is_some() {}
    Ok(ExecResult::default())
}
