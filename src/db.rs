//! Query runners.
//!
//! A runner opens a fresh connection, executes exactly one statement,
//! materializes the result into a [`TabularResult`] with every cell
//! stringified, and closes the connection. Pooling and transactions are the
//! caller's concern, not this layer's.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A fully materialized query result. Cells are opaque strings; NULL renders
/// as the empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Dialect label used inside prompts, e.g. "PostgreSQL".
    fn provider_name(&self) -> &str;

    async fn execute(&self, sql: &str, cancel: &CancellationToken) -> Result<TabularResult>;
}

/// Embedded SQLite runner.
pub struct SqliteDatabase {
    path: std::path::PathBuf,
}

impl SqliteDatabase {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn provider_name(&self) -> &str {
        "SQLite"
    }

    async fn execute(&self, sql: &str, cancel: &CancellationToken) -> Result<TabularResult> {
        let path = self.path.clone();
        let sql = sql.to_string();

        let query = tokio::task::spawn_blocking(move || -> Result<TabularResult> {
            let connection = rusqlite::Connection::open(&path)
                .map_err(|e| AgentError::Database(format!("failed to open {}: {e}", path.display())))?;
            let mut statement = connection
                .prepare(&sql)
                .map_err(|e| AgentError::Database(e.to_string()))?;

            let columns: Vec<String> = statement
                .column_names()
                .into_iter()
                .map(|c| c.to_string())
                .collect();
            let column_count = columns.len();

            let mut rows = Vec::new();
            let mut result_rows = statement
                .query([])
                .map_err(|e| AgentError::Database(e.to_string()))?;
            while let Some(row) = result_rows
                .next()
                .map_err(|e| AgentError::Database(e.to_string()))?
            {
                let mut cells = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    let value = row
                        .get_ref(index)
                        .map_err(|e| AgentError::Database(e.to_string()))?;
                    cells.push(sqlite_value_to_string(value)?);
                }
                rows.push(cells);
            }

            Ok(TabularResult::new(columns, rows))
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = query => {
                result.map_err(|e| AgentError::Database(format!("query task failed: {e}")))?
            }
        }
    }
}

fn sqlite_value_to_string(value: rusqlite::types::ValueRef<'_>) -> Result<String> {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Integer(v) => Ok(v.to_string()),
        ValueRef::Real(v) => Ok(v.to_string()),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|e| AgentError::Database(format!("text decode failed: {e}"))),
        ValueRef::Blob(bytes) => Ok(format!("<{} bytes>", bytes.len())),
    }
}

/// PostgreSQL runner. Connects per query; the URL is a regular
/// `postgres://` connection string.
pub struct PgDatabase {
    url: String,
}

impl PgDatabase {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn provider_name(&self) -> &str {
        "PostgreSQL"
    }

    async fn execute(&self, sql: &str, cancel: &CancellationToken) -> Result<TabularResult> {
        use sqlx::{Column, Connection, Row};

        let query = async {
            let mut connection = sqlx::postgres::PgConnection::connect(&self.url)
                .await
                .map_err(|e| AgentError::Database(format!("failed to connect: {e}")))?;

            let result = sqlx::query(sql)
                .fetch_all(&mut connection)
                .await
                .map_err(|e| AgentError::Database(e.to_string()));

            // Close regardless of the query outcome.
            let _ = connection.close().await;

            let pg_rows = result?;

            let columns: Vec<String> = pg_rows
                .first()
                .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();

            let mut rows = Vec::with_capacity(pg_rows.len());
            for row in &pg_rows {
                let mut cells = Vec::with_capacity(row.columns().len());
                for index in 0..row.columns().len() {
                    cells.push(pg_cell_to_string(row, index)?);
                }
                rows.push(cells);
            }

            Ok(TabularResult::new(columns, rows))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = query => result,
        }
    }
}

fn pg_cell_to_string(row: &sqlx::postgres::PgRow, index: usize) -> Result<String> {
    use sqlx::{Column, Row, TypeInfo};

    let type_name = row.columns()[index].type_info().name().to_uppercase();

    let rendered = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(|b| b.to_string())),
        "INT2" => row.try_get::<Option<i16>, _>(index).map(|v| v.map(|n| n.to_string())),
        "INT4" => row.try_get::<Option<i32>, _>(index).map(|v| v.map(|n| n.to_string())),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(|v| v.map(|n| n.to_string())),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index).map(|v| v.map(|n| n.to_string())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(|v| v.map(|n| n.to_string())),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)
            .map(|v| v.map(|n| n.to_string())),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)
        }
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| v.map(|bytes| format!("<{} bytes>", bytes.len()))),
        _ => row.try_get::<Option<String>, _>(index),
    };

    rendered
        .map(|value| value.unwrap_or_default())
        .map_err(|e| AgentError::Database(format!("column {type_name} decode failed: {e}")))
}
