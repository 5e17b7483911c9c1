use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::config::{AppConfig, HistoryBackend};
use crate::db::comparator::{diff, DiffResult};
use crate::db::connectors::postgres::PostgresConnector;
use crate::db::connectors::{ConnectionInfo, DatabaseConnector};
use crate::db::generator::{GeneratedMigration, MigrationGenerator};
use crate::db::migrator::{
    CancellationToken, Direction, ExecutionConfig, ExecutionRequest, MigrationExecutionResult,
    MigrationExecutor, StatementProgress,
};
use crate::db::registry::{ExecutionLocks, MigrationState};
use crate::db::schema::Schema;
use crate::db::splitter::split_statements;
use crate::db::sql_generator::SqlGenerator;
use crate::error::{ExecutionError, PipelineError};
use crate::history::{
    HistoryLocator, HistoryPage, HistoryQuery, HistoryStore, JsonLinesHistoryStore,
    MigrationRecord, PostgresHistoryLocator, SharedHistory, SqliteHistoryStore,
};
use crate::security::{redact_connection_string, sanitize_for_display};

/// Diff plus both scripts. Scripts are absent when nothing differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub diff: DiffResult,
    pub up: Option<GeneratedMigration>,
    pub down: Option<GeneratedMigration>,
}

/// Reachability of both sides of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub source: ConnectionInfo,
    pub target: ConnectionInfo,
}

/// Extract, diff, generate and execute, with history kept alongside.
pub struct SchemaSync {
    connector: Arc<dyn DatabaseConnector>,
    generator: MigrationGenerator,
    history: Arc<dyn HistoryLocator>,
    locks: Arc<ExecutionLocks>,
    execution: ExecutionConfig,
    state: Mutex<MigrationState>,
}

impl SchemaSync {
    /// Every execution is recorded in `history`, whatever its target.
    pub fn new(
        connector: Arc<dyn DatabaseConnector>,
        history: Arc<dyn HistoryStore>,
        config: &AppConfig,
    ) -> Self {
        Self::with_history_locator(connector, Arc::new(SharedHistory(history)), config)
    }

    pub fn with_history_locator(
        connector: Arc<dyn DatabaseConnector>,
        history: Arc<dyn HistoryLocator>,
        config: &AppConfig,
    ) -> Self {
        Self {
            connector,
            generator: MigrationGenerator::new(SqlGenerator::for_schema(
                &config.connector.schema_name,
            )),
            history,
            locks: Arc::new(ExecutionLocks::new()),
            execution: config.execution.clone(),
            state: Mutex::new(MigrationState::new()),
        }
    }

    /// PostgreSQL connector plus the configured history backend.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let connector = Arc::new(PostgresConnector::new(config.connector.clone()));
        let history: Arc<dyn HistoryLocator> = match &config.history {
            HistoryBackend::Sqlite { dir } => Arc::new(SharedHistory(Arc::new(
                SqliteHistoryStore::init(dir.clone())?,
            ))),
            HistoryBackend::JsonLines { path } => Arc::new(SharedHistory(Arc::new(
                JsonLinesHistoryStore::new(path.clone()),
            ))),
            HistoryBackend::Database => Arc::new(PostgresHistoryLocator::new(connector.clone())),
        };
        Ok(Self::with_history_locator(connector, history, &config))
    }

    /// Connect to both databases concurrently. A failure on one side is
    /// reported in its entry and does not hide the other.
    pub async fn test_connections(&self, source: &str, target: &str) -> ConnectionTestResult {
        let (source, target) =
            tokio::join!(self.test_connection(source), self.test_connection(target));
        ConnectionTestResult { source, target }
    }

    async fn test_connection(&self, connection_string: &str) -> ConnectionInfo {
        match self.connector.test_connection(connection_string).await {
            Ok(info) => info,
            Err(e) => {
                log::warn!(
                    "Connection test failed for {}: {}",
                    redact_connection_string(connection_string),
                    e
                );
                ConnectionInfo::failed(sanitize_for_display(&e.to_string()))
            }
        }
    }

    pub async fn extract_schema(&self, connection_string: &str) -> Result<Schema, PipelineError> {
        log::info!(
            "Extracting schema from {}",
            redact_connection_string(connection_string)
        );
        Ok(self.connector.extract_schema(connection_string).await?)
    }

    /// Extract both sides concurrently, then diff and generate.
    pub async fn plan(
        &self,
        source_connection: &str,
        target_connection: &str,
    ) -> Result<MigrationPlan, PipelineError> {
        let (source, target) = tokio::try_join!(
            self.extract_schema(source_connection),
            self.extract_schema(target_connection)
        )?;
        self.plan_schemas(&source, &target)
    }

    /// Diff two snapshots already in hand.
    pub fn plan_schemas(&self, source: &Schema, target: &Schema) -> Result<MigrationPlan, PipelineError> {
        let diff = diff(source, target)?;
        if !diff.summary.has_changes {
            log::info!("Schemas '{}' and '{}' are identical", source.database, target.database);
            return Ok(MigrationPlan {
                diff,
                up: None,
                down: None,
            });
        }

        let up = self.generator.generate_up(&diff.differences)?;
        let down = self.generator.generate_down(&diff.differences)?;
        log::info!(
            "Planned migration: {} ({} up / {} down statements, risk {:?})",
            diff.summary.changes_summary,
            up.statement_count,
            down.statement_count,
            up.risk_level
        );
        Ok(MigrationPlan {
            diff,
            up: Some(up),
            down: Some(down),
        })
    }

    /// Split `sql` and run it against the database behind
    /// `connection_string`. While queued behind another migration on the same
    /// target it can still be cancelled by name; a name already queued or
    /// running is rejected.
    pub async fn execute(
        &self,
        connection_string: &str,
        sql: &str,
        migration_name: &str,
        direction: Direction,
        target_database: &str,
        progress: Option<&UnboundedSender<StatementProgress>>,
    ) -> Result<MigrationExecutionResult, PipelineError> {
        let statements = split_statements(sql);
        if statements.is_empty() {
            return Err(ExecutionError::InvalidScript(
                "script contains no statements".to_string(),
            )
            .into());
        }

        let token = CancellationToken::new();
        if !self
            .state
            .lock()
            .await
            .try_insert(migration_name.to_string(), token.clone())
        {
            return Err(ExecutionError::NameInUse(migration_name.to_string()).into());
        }

        let request = ExecutionRequest {
            statements,
            migration_name: migration_name.to_string(),
            direction,
            target_database: target_database.to_string(),
        };
        let outcome = self
            .run(connection_string, request, &token, progress)
            .await;

        self.state.lock().await.remove(migration_name);
        outcome
    }

    async fn run(
        &self,
        connection_string: &str,
        request: ExecutionRequest,
        token: &CancellationToken,
        progress: Option<&UnboundedSender<StatementProgress>>,
    ) -> Result<MigrationExecutionResult, PipelineError> {
        let mut conn = self
            .connector
            .open(connection_string)
            .await
            .map_err(|e| ExecutionError::ConnectionFailed {
                target: request.target_database.clone(),
                message: e.to_string(),
            })?;
        let history = self.history.locate(connection_string).await?;

        let executor =
            MigrationExecutor::with_locks(history, self.locks.clone(), self.execution.clone());
        Ok(executor
            .execute(conn.as_mut(), request, Some(token), progress)
            .await?)
    }

    /// Cancel a queued execution. Has no effect once its transaction is open.
    pub async fn cancel(&self, migration_name: &str) -> bool {
        self.state.lock().await.cancel(migration_name)
    }

    /// Records of executions against the database behind `connection_string`,
    /// or of every target when history is kept locally.
    pub async fn list_history(
        &self,
        connection_string: &str,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, PipelineError> {
        let store = self.history.locate(connection_string).await?;
        Ok(store.list(query).await?)
    }

    pub async fn get_history_detail(
        &self,
        connection_string: &str,
        id: &str,
    ) -> Result<MigrationRecord, PipelineError> {
        let store = self.history.locate(connection_string).await?;
        Ok(store.get(id).await?)
    }
}
