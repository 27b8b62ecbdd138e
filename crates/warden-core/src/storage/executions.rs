//! Agent execution log
//!
//! Append-only record of every attempted agent call. Rows are inserted once
//! and never updated; retention is handled outside this crate.

use anyhow::{ensure, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::database::Database;
use crate::agents::AgentType;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

const SELECT_COLUMNS: &str = "SELECT id, session_id, agent_type, success, error, execution_ms,
        token_count, input, output, created_at
 FROM agent_executions";

/// One immutable execution log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub session_id: String,
    pub agent_type: AgentType,
    pub success: bool,
    pub error: Option<String>,
    pub execution_ms: u64,
    pub token_count: u64,
    pub input: Value,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub session_id: String,
    pub agent_type: AgentType,
    pub success: bool,
    pub error: Option<String>,
    pub execution_ms: u64,
    pub token_count: u64,
    pub input: Value,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl NewExecution {
    pub fn succeeded(
        session_id: impl Into<String>,
        agent_type: AgentType,
        execution_ms: u64,
        token_count: u64,
        input: Value,
        output: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_type,
            success: true,
            error: None,
            execution_ms,
            token_count,
            input,
            output: Some(output),
            created_at,
        }
    }

    pub fn failed(
        session_id: impl Into<String>,
        agent_type: AgentType,
        execution_ms: u64,
        error: impl Into<String>,
        input: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_type,
            success: false,
            error: Some(error.into()),
            execution_ms,
            token_count: 0,
            input,
            output: None,
            created_at,
        }
    }
}

/// Filters for the paginated log view. `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub agent_type: Option<AgentType>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl LogFilter {
    fn normalized_page(&self) -> u32 {
        self.page.max(1)
    }

    fn normalized_page_size(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub records: Vec<ExecutionRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

/// Fixed-width UTC timestamps so lexical order matches time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct ExecutionLogStore<'a> {
    db: &'a Database,
}

impl<'a> ExecutionLogStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a record. `error` must be present exactly when `success` is false.
    pub fn record(&self, new: NewExecution) -> Result<ExecutionRecord> {
        ensure!(
            new.success != new.error.is_some(),
            "execution error must be present iff the execution failed"
        );

        let record = ExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: new.session_id,
            agent_type: new.agent_type,
            success: new.success,
            error: new.error,
            execution_ms: new.execution_ms,
            token_count: new.token_count,
            input: new.input,
            output: new.output,
            // Stored at millisecond precision.
            created_at: new.created_at.trunc_subsecs(3),
        };

        let input = serde_json::to_string(&record.input)?;
        let output = record
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.conn().execute(
            "INSERT INTO agent_executions (
                id, session_id, agent_type, success, error, execution_ms,
                token_count, input, output, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.session_id,
                record.agent_type.as_str(),
                record.success,
                record.error,
                record.execution_ms as i64,
                record.token_count as i64,
                input,
                output,
                timestamp(&record.created_at),
            ],
        )?;

        tracing::debug!(
            id = %record.id,
            agent = %record.agent_type,
            success = record.success,
            execution_ms = record.execution_ms,
            "Recorded agent execution"
        );

        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        self.db
            .conn()
            .query_row(&sql, [id], Self::map_row)
            .optional()
            .map_err(Into::into)
    }

    /// Paginated listing, newest first.
    pub fn list(&self, filter: &LogFilter) -> Result<LogPage> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(agent) = filter.agent_type {
            clauses.push("agent_type = ?");
            args.push(SqlValue::Text(agent.as_str().to_string()));
        }
        if let Some(success) = filter.success {
            clauses.push("success = ?");
            args.push(SqlValue::Integer(i64::from(success)));
        }
        if let Some(from) = filter.from {
            clauses.push("created_at >= ?");
            args.push(SqlValue::Text(timestamp(&from)));
        }
        if let Some(to) = filter.to {
            clauses.push("created_at <= ?");
            args.push(SqlValue::Text(timestamp(&to)));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.db.conn().query_row(
            &format!("SELECT COUNT(*) FROM agent_executions{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let page = filter.normalized_page();
        let page_size = filter.normalized_page_size();
        let offset = u64::from(page - 1) * u64::from(page_size);

        let mut page_args = args;
        page_args.push(SqlValue::Integer(i64::from(page_size)));
        page_args.push(SqlValue::Integer(offset as i64));

        let sql = format!(
            "{SELECT_COLUMNS}{where_sql} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(page_args.iter()), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let total = total.max(0) as u64;
        Ok(LogPage {
            has_more: offset + (records.len() as u64) < total,
            records,
            total,
            page,
            page_size,
        })
    }

    /// Most recent failures at or after `since`.
    pub fn failed(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE success = 0 AND created_at >= ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let records = stmt
            .query_map(params![timestamp(&since), i64::from(limit)], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Executions slower than `threshold_ms`, slowest first.
    pub fn slow(&self, threshold_ms: u64, limit: u32) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE execution_ms > ?1
             ORDER BY execution_ms DESC, created_at DESC LIMIT ?2"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let records = stmt
            .query_map(params![threshold_ms as i64, i64::from(limit)], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every record created at or after `cutoff`, oldest first.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let sql =
            format!("{SELECT_COLUMNS} WHERE created_at >= ?1 ORDER BY created_at ASC, rowid ASC");
        let mut stmt = self.db.conn().prepare(&sql)?;
        let records = stmt
            .query_map([timestamp(&cutoff)], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn last_execution_at(&self, agent: AgentType) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = self.db.conn().query_row(
            "SELECT MAX(created_at) FROM agent_executions WHERE agent_type = ?1",
            [agent.as_str()],
            |row| row.get(0),
        )?;
        Ok(latest.and_then(|ts| parse_timestamp(&ts)))
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.db
                .conn()
                .query_row("SELECT COUNT(*) FROM agent_executions", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ExecutionRecord> {
        let agent_raw: String = row.get(2)?;
        let agent_type = agent_raw.parse::<AgentType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let execution_ms: i64 = row.get(5)?;
        let token_count: i64 = row.get(6)?;
        let input: String = row.get(7)?;
        let output: Option<String> = row.get(8)?;
        let created_at: String = row.get(9)?;

        Ok(ExecutionRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            agent_type,
            success: row.get(3)?,
            error: row.get(4)?,
            execution_ms: execution_ms.max(0) as u64,
            token_count: token_count.max(0) as u64,
            input: parse_payload(input),
            output: output.map(parse_payload),
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        })
    }
}

fn parse_payload(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
