use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{HistoryPage, HistoryQuery, HistoryStore, MigrationRecord, MigrationStatus};
use crate::db::migrator::Direction;
use crate::error::{ExecutionErrorKind, HistoryError};

const SCHEMA_SQL: &str = include_str!("../../historydb/schema.sql");

const SELECT_COLUMNS: &str = "id, migration_name, direction, target_database, status, timestamp, \
     executed_statements, total_statements, duration_ms, message, failed_at_statement, \
     failed_statement, error_code, error_kind, error, sql_executed, rollback_failed";

/// History kept in an embedded SQLite file.
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

// ── Row mapping ─────────────────────────────────────────────────────────

struct HistoryRow {
    id: String,
    migration_name: String,
    direction: String,
    target_database: String,
    status: String,
    timestamp: String,
    executed_statements: i64,
    total_statements: i64,
    duration_ms: i64,
    message: String,
    failed_at_statement: Option<i64>,
    failed_statement: Option<String>,
    error_code: Option<String>,
    error_kind: Option<String>,
    error: Option<String>,
    sql_executed: String,
    rollback_failed: bool,
}

impl HistoryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            migration_name: row.get(1)?,
            direction: row.get(2)?,
            target_database: row.get(3)?,
            status: row.get(4)?,
            timestamp: row.get(5)?,
            executed_statements: row.get(6)?,
            total_statements: row.get(7)?,
            duration_ms: row.get(8)?,
            message: row.get(9)?,
            failed_at_statement: row.get(10)?,
            failed_statement: row.get(11)?,
            error_code: row.get(12)?,
            error_kind: row.get(13)?,
            error: row.get(14)?,
            sql_executed: row.get(15)?,
            rollback_failed: row.get(16)?,
        })
    }

    fn into_record(self) -> anyhow::Result<MigrationRecord> {
        let direction = Direction::parse(&self.direction)
            .ok_or_else(|| anyhow!("Unknown direction '{}' in record {}", self.direction, self.id))?;
        let status = MigrationStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("Unknown status '{}' in record {}", self.status, self.id))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .with_context(|| format!("Bad timestamp in record {}", self.id))?
            .with_timezone(&Utc);

        Ok(MigrationRecord {
            id: self.id,
            migration_name: self.migration_name,
            direction,
            target_database: self.target_database,
            status,
            timestamp,
            executed_statements: self.executed_statements.max(0) as usize,
            total_statements: self.total_statements.max(0) as usize,
            duration_ms: self.duration_ms.max(0) as u64,
            message: self.message,
            rollback_failed: self.rollback_failed,
            failed_at_statement: self.failed_at_statement.map(|n| n.max(0) as usize),
            failed_statement: self.failed_statement,
            error_code: self.error_code,
            error_kind: self.error_kind.as_deref().and_then(ExecutionErrorKind::parse),
            error: self.error,
            sql_executed: Some(self.sql_executed),
        })
    }
}

/// Fixed-width UTC form so lexical order matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl SqliteHistoryStore {
    /// Open (or create) `history.db` inside `data_dir`.
    pub fn init(data_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;

        let db_path = data_dir.join("history.db");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open history db: {}", db_path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to set WAL mode")?;

        let store = Self::from_connection(conn)?;
        log::info!("History database initialized at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory history db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to run history schema migration")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, record: MigrationRecord) -> Result<(), HistoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let inserted = c.execute(
                "INSERT INTO migration_history \
                 (id, migration_name, direction, target_database, status, timestamp, \
                  executed_statements, total_statements, duration_ms, message, failed_at_statement, \
                  failed_statement, error_code, error_kind, error, sql_executed, rollback_failed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    record.id,
                    record.migration_name,
                    record.direction.as_str(),
                    record.target_database,
                    record.status.as_str(),
                    format_timestamp(&record.timestamp),
                    record.executed_statements as i64,
                    record.total_statements as i64,
                    record.duration_ms as i64,
                    record.message,
                    record.failed_at_statement.map(|n| n as i64),
                    record.failed_statement,
                    record.error_code,
                    record.error_kind.map(|k| k.as_str()),
                    record.error,
                    record.sql_executed.as_deref().unwrap_or_default(),
                    record.rollback_failed,
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_primary_key_violation(&e) => Err(HistoryError::DuplicateId(record.id)),
                Err(e) => Err(anyhow::Error::new(e)
                    .context("Failed to save migration record")
                    .into()),
            }
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn list(&self, query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
        let conn = self.conn.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || -> Result<HistoryPage, HistoryError> {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let target = query.target_database.as_deref();
            let status = query.status.map(|s| s.as_str());

            let total: i64 = c
                .query_row(
                    "SELECT COUNT(*) FROM migration_history \
                     WHERE (?1 IS NULL OR target_database = ?1) AND (?2 IS NULL OR status = ?2)",
                    rusqlite::params![target, status],
                    |row| row.get(0),
                )
                .context("Failed to count migration records")?;

            let sql = format!(
                "SELECT {} FROM migration_history \
                 WHERE (?1 IS NULL OR target_database = ?1) AND (?2 IS NULL OR status = ?2) \
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?3 OFFSET ?4",
                SELECT_COLUMNS
            );
            let mut stmt = c
                .prepare(&sql)
                .context("Failed to prepare migration history query")?;
            let rows = stmt
                .query_map(
                    rusqlite::params![target, status, query.limit as i64, query.offset as i64],
                    HistoryRow::from_row,
                )
                .context("Failed to query migration history")?;

            let mut migrations = Vec::new();
            for row in rows {
                let row = row.context("Failed to read migration record")?;
                let mut record = row.into_record()?;
                record.sql_executed = None;
                migrations.push(record);
            }

            Ok(HistoryPage {
                migrations,
                total: total.max(0) as usize,
            })
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<MigrationRecord, HistoryError> {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let sql = format!("SELECT {} FROM migration_history WHERE id = ?1", SELECT_COLUMNS);
            let row = c
                .query_row(&sql, [&id], HistoryRow::from_row)
                .optional()
                .context("Failed to load migration record")?;
            match row {
                Some(row) => Ok(row.into_record()?),
                None => Err(HistoryError::NotFound(id)),
            }
        })
        .await
        .context("spawn_blocking join error")?
    }
}
