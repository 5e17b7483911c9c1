use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Row};

use super::{HistoryLocator, HistoryPage, HistoryQuery, HistoryStore, MigrationRecord, MigrationStatus};
use crate::db::connectors::postgres::PostgresConnector;
use crate::db::migrator::Direction;
use crate::error::{ExecutionErrorKind, HistoryError};
use crate::security::redact_connection_string;

const SCHEMA_SQL: &str = include_str!("../../historydb/postgres_schema.sql");

const SELECT_COLUMNS: &str = "id, migration_name, direction, target_database, status, timestamp, \
     executed_statements, total_statements, duration_ms, message, rollback_failed, \
     failed_at_statement, failed_statement, error_code, error_kind, error, sql_executed";

const FILTER: &str = "($1::text IS NULL OR target_database = $1) AND ($2::text IS NULL OR status = $2)";

/// History kept in `schemasync.migration_history` of the database it
/// describes.
pub struct PostgresHistoryStore {
    client: Client,
}

impl PostgresHistoryStore {
    /// Connect and make sure the history table exists.
    pub async fn connect(
        connector: &PostgresConnector,
        connection_string: &str,
    ) -> Result<Self, HistoryError> {
        let client = connector
            .connect(connection_string)
            .await
            .context("Failed to connect to history database")?;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .context("Failed to create history table")?;
        log::debug!(
            "History table ready on {}",
            redact_connection_string(connection_string)
        );
        Ok(Self { client })
    }
}

fn record_from_row(row: &Row) -> anyhow::Result<MigrationRecord> {
    let id: String = row.try_get(0)?;
    let direction: String = row.try_get(2)?;
    let status: String = row.try_get(4)?;
    let error_kind: Option<String> = row.try_get(14)?;
    let executed: i32 = row.try_get(6)?;
    let total: i32 = row.try_get(7)?;
    let duration_ms: i64 = row.try_get(8)?;
    let failed_at: Option<i32> = row.try_get(11)?;
    let timestamp: DateTime<Utc> = row.try_get(5)?;

    Ok(MigrationRecord {
        direction: Direction::parse(&direction)
            .ok_or_else(|| anyhow!("Unknown direction '{}' in record {}", direction, id))?,
        status: MigrationStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown status '{}' in record {}", status, id))?,
        migration_name: row.try_get(1)?,
        target_database: row.try_get(3)?,
        timestamp,
        executed_statements: executed.max(0) as usize,
        total_statements: total.max(0) as usize,
        duration_ms: duration_ms.max(0) as u64,
        message: row.try_get(9)?,
        rollback_failed: row.try_get(10)?,
        failed_at_statement: failed_at.map(|n| n.max(0) as usize),
        failed_statement: row.try_get(12)?,
        error_code: row.try_get(13)?,
        error_kind: error_kind.as_deref().and_then(ExecutionErrorKind::parse),
        error: row.try_get(15)?,
        sql_executed: Some(row.try_get(16)?),
        id,
    })
}

fn list_sql() -> String {
    format!(
        "SELECT {} FROM schemasync.migration_history WHERE {} \
         ORDER BY timestamp DESC, seq DESC LIMIT $3 OFFSET $4",
        SELECT_COLUMNS, FILTER
    )
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(&self, record: MigrationRecord) -> Result<(), HistoryError> {
        let inserted = self
            .client
            .execute(
                "INSERT INTO schemasync.migration_history \
                 (id, migration_name, direction, target_database, status, timestamp, \
                  executed_statements, total_statements, duration_ms, message, rollback_failed, \
                  failed_at_statement, failed_statement, error_code, error_kind, error, sql_executed) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
                &[
                    &record.id,
                    &record.migration_name,
                    &record.direction.as_str(),
                    &record.target_database,
                    &record.status.as_str(),
                    &record.timestamp,
                    &(record.executed_statements as i32),
                    &(record.total_statements as i32),
                    &(record.duration_ms as i64),
                    &record.message,
                    &record.rollback_failed,
                    &record.failed_at_statement.map(|n| n as i32),
                    &record.failed_statement,
                    &record.error_code,
                    &record.error_kind.map(|k| k.as_str()),
                    &record.error,
                    &record.sql_executed.as_deref().unwrap_or_default(),
                ],
            )
            .await;
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(HistoryError::DuplicateId(record.id))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to save migration record")
                .into()),
        }
    }

    async fn list(&self, query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
        let target = query.target_database.as_deref();
        let status = query.status.map(|s| s.as_str());

        let count_sql = format!("SELECT COUNT(*) FROM schemasync.migration_history WHERE {}", FILTER);
        let total: i64 = self
            .client
            .query_one(count_sql.as_str(), &[&target, &status])
            .await
            .and_then(|row| row.try_get(0))
            .context("Failed to count migration records")?;

        let rows = self
            .client
            .query(
                list_sql().as_str(),
                &[&target, &status, &(query.limit as i64), &(query.offset as i64)],
            )
            .await
            .context("Failed to query migration history")?;

        let mut migrations = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = record_from_row(row)?;
            record.sql_executed = None;
            migrations.push(record);
        }

        Ok(HistoryPage {
            migrations,
            total: total.max(0) as usize,
        })
    }

    async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError> {
        let sql = format!(
            "SELECT {} FROM schemasync.migration_history WHERE id = $1",
            SELECT_COLUMNS
        );
        let row = self
            .client
            .query_opt(sql.as_str(), &[&id])
            .await
            .context("Failed to load migration record")?;
        match row {
            Some(row) => Ok(record_from_row(&row)?),
            None => Err(HistoryError::NotFound(id.to_string())),
        }
    }
}

/// Opens the history table of whichever database a call targets.
pub struct PostgresHistoryLocator {
    connector: Arc<PostgresConnector>,
}

impl PostgresHistoryLocator {
    pub fn new(connector: Arc<PostgresConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl HistoryLocator for PostgresHistoryLocator {
    async fn locate(&self, connection_string: &str) -> Result<Arc<dyn HistoryStore>, HistoryError> {
        let store = PostgresHistoryStore::connect(&self.connector, connection_string).await?;
        Ok(Arc::new(store))
    }
}
