pub mod jsonl;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::migrator::{Direction, MigrationExecutionResult};
use crate::error::{ExecutionErrorKind, HistoryError};

pub use jsonl::JsonLinesHistoryStore;
pub use postgres::{PostgresHistoryLocator, PostgresHistoryStore};
pub use sqlite::SqliteHistoryStore;

/// Outcome of a recorded execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Success,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Success => "success",
            MigrationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(MigrationStatus::Success),
            "failed" => Some(MigrationStatus::Failed),
            _ => None,
        }
    }
}

/// Immutable audit entry for one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: String,
    pub migration_name: String,
    pub direction: Direction,
    pub target_database: String,
    pub status: MigrationStatus,
    pub timestamp: DateTime<Utc>,
    pub executed_statements: usize,
    pub total_statements: usize,
    pub duration_ms: u64,
    pub message: String,
    #[serde(default)]
    pub rollback_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_statement: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExecutionErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full script text; omitted from list results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_executed: Option<String>,
}

impl MigrationRecord {
    pub fn from_result(result: &MigrationExecutionResult, sql_executed: String) -> Self {
        Self {
            id: result.migration_id.clone(),
            migration_name: result.migration_name.clone(),
            direction: result.direction,
            target_database: result.target_database.clone(),
            status: if result.success {
                MigrationStatus::Success
            } else {
                MigrationStatus::Failed
            },
            timestamp: result.timestamp,
            executed_statements: result.executed_statements,
            total_statements: result.total_statements,
            duration_ms: result.duration.ms,
            message: result.message.clone(),
            rollback_failed: result.rollback_failed,
            failed_at_statement: result.failed_at_statement,
            failed_statement: result.failed_statement.clone(),
            error_code: result.error_code.clone(),
            error_kind: result.error_kind,
            error: result.error.clone(),
            sql_executed: Some(sql_executed),
        }
    }

    fn summary(mut self) -> Self {
        self.sql_executed = None;
        self
    }
}

/// Filters and paging for `HistoryStore::list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryQuery {
    pub target_database: Option<String>,
    pub status: Option<MigrationStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            target_database: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    fn matches(&self, record: &MigrationRecord) -> bool {
        if let Some(ref target) = self.target_database {
            if &record.target_database != target {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

/// One page of records plus the unpaginated match count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub migrations: Vec<MigrationRecord>,
    pub total: usize,
}

/// Append-only persistence of execution records
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a new record. Ids are never overwritten.
    async fn append(&self, record: MigrationRecord) -> Result<(), HistoryError>;

    /// Newest first, without SQL bodies.
    async fn list(&self, query: &HistoryQuery) -> Result<HistoryPage, HistoryError>;

    /// Full record including the SQL text.
    async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError>;
}

/// Picks the store holding the history of the database behind a
/// connection string.
#[async_trait]
pub trait HistoryLocator: Send + Sync {
    async fn locate(&self, connection_string: &str) -> Result<Arc<dyn HistoryStore>, HistoryError>;
}

/// One local store for every target database.
pub struct SharedHistory(pub Arc<dyn HistoryStore>);

#[async_trait]
impl HistoryLocator for SharedHistory {
    async fn locate(&self, _connection_string: &str) -> Result<Arc<dyn HistoryStore>, HistoryError> {
        Ok(self.0.clone())
    }
}

/// Filter, sort newest first and paginate records held in insertion order.
/// Records with equal timestamps keep the most recently appended first.
fn paginate(records: Vec<MigrationRecord>, query: &HistoryQuery) -> HistoryPage {
    let mut matching: Vec<MigrationRecord> = records
        .into_iter()
        .rev()
        .filter(|r| query.matches(r))
        .collect();
    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let total = matching.len();
    let migrations = matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .map(MigrationRecord::summary)
        .collect();

    HistoryPage { migrations, total }
}

/// Store kept in process memory, for embedding and tests.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: Mutex<Vec<MigrationRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: MigrationRecord) -> Result<(), HistoryError> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(HistoryError::DuplicateId(record.id));
        }
        records.push(record);
        Ok(())
    }

    async fn list(&self, query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
        let records = self.records.lock().await.clone();
        Ok(paginate(records, query))
    }

    async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// A record at `minute` minutes past a fixed hour.
    pub fn record(id: &str, target: &str, status: MigrationStatus, minute: u32) -> MigrationRecord {
        let failed = status == MigrationStatus::Failed;
        MigrationRecord {
            id: id.to_string(),
            migration_name: format!("migration {}", id),
            direction: Direction::Up,
            target_database: target.to_string(),
            status,
            timestamp: Utc
                .with_ymd_and_hms(2025, 3, 1, 12, minute, 0)
                .single()
                .unwrap(),
            executed_statements: if failed { 1 } else { 2 },
            total_statements: 2,
            duration_ms: 15,
            message: "done".to_string(),
            rollback_failed: false,
            failed_at_statement: failed.then_some(2),
            failed_statement: failed.then(|| "DROP TABLE missing".to_string()),
            error_code: failed.then(|| "42P01".to_string()),
            error_kind: failed.then_some(ExecutionErrorKind::StatementSyntaxError),
            error: failed.then(|| "table \"missing\" does not exist".to_string()),
            sql_executed: Some("CREATE TABLE a ();\nDROP TABLE missing;".to_string()),
        }
    }
}
