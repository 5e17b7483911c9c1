use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use super::connectors::{MigrationConnection, StatementFailure};
use super::generator::join_statements;
use super::registry::ExecutionLocks;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::history::{HistoryStore, MigrationRecord};

const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration & request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Upper bound on one migration, from BEGIN through COMMIT
    pub transaction_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_secs: 300,
        }
    }
}

impl ExecutionConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

/// Which script of a generated pair is being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered statement list to run as one transaction
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub statements: Vec<String>,
    pub migration_name: String,
    pub direction: Direction,
    pub target_database: String,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDuration {
    pub ms: u64,
    pub seconds: f64,
}

impl From<Duration> for ExecutionDuration {
    fn from(d: Duration) -> Self {
        Self {
            ms: d.as_millis() as u64,
            seconds: d.as_secs_f64(),
        }
    }
}

/// Outcome of one execution attempt. A failed migration is reported here,
/// not as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationExecutionResult {
    pub success: bool,
    pub migration_id: String,
    pub migration_name: String,
    pub timestamp: DateTime<Utc>,
    pub executed_statements: usize,
    pub total_statements: usize,
    pub direction: Direction,
    pub target_database: String,
    pub duration: ExecutionDuration,
    pub message: String,
    /// Set when ROLLBACK errored or timed out after a failure
    #[serde(default)]
    pub rollback_failed: bool,
    /// 1-based
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
}

/// Emitted after each statement succeeds inside the open transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementProgress {
    pub migration_id: String,
    /// 1-based index of the statement that just finished
    pub index: usize,
    pub total: usize,
    pub statement: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TransactionState {
    TransactionOpen,
    Running,
    Committed,
    RolledBack,
    Closed,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A simple cancellation token backed by an `AtomicBool`.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// How the transaction ended
enum RunOutcome {
    Committed,
    Failed { index: usize, failure: StatementFailure },
    CommitFailed(StatementFailure),
    /// `in_flight` is the 0-based statement running at the deadline, or the
    /// statement count when COMMIT was
    TimedOut { in_flight: usize },
}

/// Runs migration scripts atomically and records every attempt.
pub struct MigrationExecutor {
    history: Arc<dyn HistoryStore>,
    locks: Arc<ExecutionLocks>,
    config: ExecutionConfig,
}

impl MigrationExecutor {
    pub fn new(history: Arc<dyn HistoryStore>, config: ExecutionConfig) -> Self {
        Self::with_locks(history, Arc::new(ExecutionLocks::new()), config)
    }

    /// Share locks with other executors in the process.
    pub fn with_locks(
        history: Arc<dyn HistoryStore>,
        locks: Arc<ExecutionLocks>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            history,
            locks,
            config,
        }
    }

    /// Apply `request.statements` in order inside one transaction.
    ///
    /// The first failing statement aborts the run and rolls everything back;
    /// later statements are never sent. Exactly one history record is written
    /// once a transaction has been opened, whatever the outcome. Failures that
    /// happen before that point (empty script, cancellation, BEGIN rejected or
    /// stalled) are returned as `Err` and leave no record.
    ///
    /// BEGIN, the statements and COMMIT share one deadline. When it passes the
    /// server is asked to cancel the running command before ROLLBACK is sent.
    pub async fn execute(
        &self,
        conn: &mut dyn MigrationConnection,
        request: ExecutionRequest,
        cancel: Option<&CancellationToken>,
        progress: Option<&UnboundedSender<StatementProgress>>,
    ) -> Result<MigrationExecutionResult, ExecutionError> {
        if request.statements.is_empty() {
            return Err(ExecutionError::InvalidScript(
                "migration contains no statements".to_string(),
            ));
        }

        let _guard = self.locks.acquire(&request.target_database).await;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                log::info!(
                    "Migration '{}' cancelled before start",
                    request.migration_name
                );
                return Err(ExecutionError::Cancelled);
            }
        }

        let migration_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let start = Instant::now();
        let total = request.statements.len();
        let secs = self.config.transaction_timeout_secs;
        let deadline = tokio::time::Instant::now() + self.config.transaction_timeout();

        let opened = tokio::time::timeout_at(deadline, conn.begin()).await;
        let begin_error = match opened {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => {
                abort(conn, &migration_id).await;
                Some(format!("BEGIN did not complete within {}s", secs))
            }
        };
        if let Some(message) = begin_error {
            log::error!(
                "Could not open transaction on '{}': {}",
                request.target_database,
                message
            );
            return Err(ExecutionError::ConnectionFailed {
                target: request.target_database.clone(),
                message,
            });
        }
        log_state(&migration_id, TransactionState::TransactionOpen);

        let mut executed = 0usize;
        let timed = tokio::time::timeout_at(
            deadline,
            run_transaction(
                &mut *conn,
                &request.statements,
                &migration_id,
                &mut executed,
                progress,
            ),
        )
        .await;
        let outcome = timed.unwrap_or(RunOutcome::TimedOut {
            in_flight: executed,
        });

        let mut result = MigrationExecutionResult {
            success: false,
            migration_id: migration_id.clone(),
            migration_name: request.migration_name.clone(),
            timestamp,
            executed_statements: executed,
            total_statements: total,
            direction: request.direction,
            target_database: request.target_database.clone(),
            duration: Duration::ZERO.into(),
            message: String::new(),
            rollback_failed: false,
            failed_at_statement: None,
            failed_statement: None,
            error_code: None,
            error_kind: None,
            error: None,
        };

        match outcome {
            RunOutcome::Committed => {
                result.success = true;
                result.message = format!(
                    "Migration '{}' applied: {} statement(s) executed",
                    request.migration_name, total
                );
            }
            RunOutcome::CommitFailed(failure) => {
                log::error!("COMMIT failed for migration {}: {}", migration_id, failure);
                result.rollback_failed = !rollback(conn, &migration_id).await;
                result.message = format!("Commit failed; {}", rollback_note(result.rollback_failed));
                result.error_code = failure.code;
                result.error_kind = Some(failure.kind);
                result.error = Some(failure.message);
            }
            RunOutcome::Failed { index, failure } => {
                log::error!(
                    "Statement {} of {} failed (SQLSTATE {}): {}",
                    index + 1,
                    total,
                    failure.code.as_deref().unwrap_or("none"),
                    failure.message
                );
                result.rollback_failed = !rollback(conn, &migration_id).await;
                result.message = format!(
                    "Migration failed at statement {} of {}; {}",
                    index + 1,
                    total,
                    rollback_note(result.rollback_failed)
                );
                result.failed_at_statement = Some(index + 1);
                result.failed_statement = Some(request.statements[index].clone());
                result.error_code = failure.code;
                result.error_kind = Some(failure.kind);
                result.error = Some(failure.message);
            }
            RunOutcome::TimedOut { in_flight } => {
                // in_flight == total: every statement ran and COMMIT was pending
                let at_commit = in_flight >= total;
                if at_commit {
                    log::error!("Migration {} timed out after {}s during COMMIT", migration_id, secs);
                } else {
                    log::error!(
                        "Migration {} timed out after {}s during statement {} of {}",
                        migration_id,
                        secs,
                        in_flight + 1,
                        total
                    );
                }
                result.rollback_failed = !abort(conn, &migration_id).await;
                result.message = format!(
                    "Migration timed out after {}s; {}",
                    secs,
                    rollback_note(result.rollback_failed)
                );
                if !at_commit {
                    result.failed_at_statement = Some(in_flight + 1);
                    result.failed_statement = request.statements.get(in_flight).cloned();
                }
                result.error_kind = Some(ExecutionErrorKind::Timeout);
                result.error = Some(format!("Transaction exceeded timeout of {}s", secs));
            }
        }
        log_state(&migration_id, TransactionState::Closed);
        result.duration = start.elapsed().into();

        let record = MigrationRecord::from_result(&result, join_statements(&request.statements));
        if let Err(e) = self.history.append(record).await {
            log::error!("Failed to record migration {}: {}", migration_id, e);
            return Err(ExecutionError::HistoryWrite {
                result: Box::new(result),
                source: e,
            });
        }
        log::info!(
            "Recorded migration {} ({}, {}/{} statements, success={})",
            migration_id,
            result.direction,
            result.executed_statements,
            result.total_statements,
            result.success
        );

        Ok(result)
    }
}

/// Send statements one by one, counting successes in `executed`, then
/// COMMIT. Stops at the first failure.
async fn run_transaction(
    conn: &mut dyn MigrationConnection,
    statements: &[String],
    migration_id: &str,
    executed: &mut usize,
    progress: Option<&UnboundedSender<StatementProgress>>,
) -> RunOutcome {
    log_state(migration_id, TransactionState::Running);
    let total = statements.len();
    for (index, statement) in statements.iter().enumerate() {
        if let Err(failure) = conn.execute(statement).await {
            return RunOutcome::Failed { index, failure };
        }
        *executed = index + 1;
        log::debug!("Statement {}/{} ok", index + 1, total);

        if let Some(tx) = progress {
            // Receiver may be gone
            let _ = tx.send(StatementProgress {
                migration_id: migration_id.to_string(),
                index: index + 1,
                total,
                statement: statement.clone(),
            });
        }
    }

    match conn.commit().await {
        Ok(()) => {
            log_state(migration_id, TransactionState::Committed);
            RunOutcome::Committed
        }
        Err(failure) => RunOutcome::CommitFailed(failure),
    }
}

/// Returns whether the server confirmed the ROLLBACK.
async fn rollback(conn: &mut dyn MigrationConnection, migration_id: &str) -> bool {
    match tokio::time::timeout(ROLLBACK_TIMEOUT, conn.rollback()).await {
        Ok(Ok(())) => {
            log_state(migration_id, TransactionState::RolledBack);
            true
        }
        Ok(Err(e)) => {
            log::error!("ROLLBACK failed for migration {}: {}", migration_id, e);
            false
        }
        Err(_) => {
            log::error!(
                "ROLLBACK for migration {} did not finish within {}s",
                migration_id,
                ROLLBACK_TIMEOUT.as_secs()
            );
            false
        }
    }
}

/// Cancel the in-flight server work, then roll back.
async fn abort(conn: &mut dyn MigrationConnection, migration_id: &str) -> bool {
    match tokio::time::timeout(ROLLBACK_TIMEOUT, conn.cancel()).await {
        Ok(Ok(())) => log::info!("Cancel request sent for migration {}", migration_id),
        Ok(Err(e)) => log::warn!("Cancel request for migration {} failed: {}", migration_id, e),
        Err(_) => log::warn!("Cancel request for migration {} timed out", migration_id),
    }
    rollback(conn, migration_id).await
}

fn rollback_note(rollback_failed: bool) -> &'static str {
    if rollback_failed {
        "ROLLBACK could not be confirmed; the server aborts the transaction when the session closes"
    } else {
        "all changes were rolled back"
    }
}

fn log_state(migration_id: &str, state: TransactionState) {
    log::debug!("Migration {} -> {:?}", migration_id, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HistoryError;
    use crate::history::{
        HistoryPage, HistoryQuery, InMemoryHistoryStore, MigrationStatus,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records what it is asked to do; fails on statements containing `fail_on`.
    #[derive(Default)]
    struct MockConnection {
        log: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        fail_begin: bool,
        hang_begin: bool,
        fail_commit: bool,
        fail_rollback: bool,
        hang_on: Option<String>,
        hang_commit: bool,
    }

    impl MockConnection {
        fn events(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MigrationConnection for MockConnection {
        async fn begin(&mut self) -> Result<(), StatementFailure> {
            if self.hang_begin {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_begin {
                return Err(StatementFailure::new(
                    ExecutionErrorKind::ConnectionLost,
                    Some("08006".into()),
                    "connection reset",
                ));
            }
            self.log.lock().unwrap().push("BEGIN".into());
            Ok(())
        }

        async fn execute(&mut self, statement: &str) -> Result<(), StatementFailure> {
            if let Some(ref marker) = self.hang_on {
                if statement.contains(marker.as_str()) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
            if let Some(ref marker) = self.fail_on {
                if statement.contains(marker.as_str()) {
                    return Err(StatementFailure::new(
                        ExecutionErrorKind::StatementSyntaxError,
                        Some("42P01".into()),
                        "relation does not exist",
                    ));
                }
            }
            self.log.lock().unwrap().push(statement.to_string());
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), StatementFailure> {
            if self.hang_commit {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_commit {
                return Err(StatementFailure::new(
                    ExecutionErrorKind::ConstraintViolation,
                    Some("23503".into()),
                    "deferred constraint violated",
                ));
            }
            self.log.lock().unwrap().push("COMMIT".into());
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), StatementFailure> {
            if self.fail_rollback {
                return Err(StatementFailure::new(
                    ExecutionErrorKind::ConnectionLost,
                    None,
                    "connection closed",
                ));
            }
            self.log.lock().unwrap().push("ROLLBACK".into());
            Ok(())
        }

        async fn cancel(&mut self) -> Result<(), StatementFailure> {
            self.log.lock().unwrap().push("CANCEL".into());
            Ok(())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn append(&self, _record: MigrationRecord) -> Result<(), HistoryError> {
            Err(anyhow::anyhow!("disk full").into())
        }
        async fn list(&self, _query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
            Ok(HistoryPage { migrations: vec![], total: 0 })
        }
        async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError> {
            Err(HistoryError::NotFound(id.to_string()))
        }
    }

    fn five_statements() -> Vec<String> {
        (1..=5).map(|i| format!("CREATE TABLE t{} (id int)", i)).collect()
    }

    fn request(statements: Vec<String>) -> ExecutionRequest {
        ExecutionRequest {
            statements,
            migration_name: "add tables".into(),
            direction: Direction::Up,
            target_database: "app".into(),
        }
    }

    fn executor() -> (MigrationExecutor, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let exec = MigrationExecutor::new(history.clone(), ExecutionConfig::default());
        (exec, history)
    }

    #[tokio::test]
    async fn test_all_statements_commit() {
        let (exec, history) = executor();
        let mut conn = MockConnection::default();
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.executed_statements, 5);
        assert_eq!(result.total_statements, 5);
        assert!(result.failed_at_statement.is_none());
        assert!(result.error_code.is_none());

        let events = conn.events();
        assert_eq!(events.first().unwrap(), "BEGIN");
        assert_eq!(events.last().unwrap(), "COMMIT");
        assert_eq!(events.len(), 7);

        let rec = history.get(&result.migration_id).await.unwrap();
        assert_eq!(rec.status, MigrationStatus::Success);
        assert!(rec.sql_executed.unwrap().contains("CREATE TABLE t5 (id int);"));
    }

    #[tokio::test]
    async fn test_failure_at_third_statement_rolls_back() {
        let (exec, history) = executor();
        let mut conn = MockConnection {
            fail_on: Some("t3".into()),
            ..Default::default()
        };
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.executed_statements, 2);
        assert_eq!(result.failed_at_statement, Some(3));
        assert_eq!(result.failed_statement.as_deref(), Some("CREATE TABLE t3 (id int)"));
        assert_eq!(result.error_code.as_deref(), Some("42P01"));
        assert_eq!(result.error_kind, Some(ExecutionErrorKind::StatementSyntaxError));

        assert_eq!(
            conn.events(),
            vec![
                "BEGIN",
                "CREATE TABLE t1 (id int)",
                "CREATE TABLE t2 (id int)",
                "ROLLBACK"
            ]
        );

        let page = history.list(&HistoryQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.migrations[0].status, MigrationStatus::Failed);
        assert_eq!(page.migrations[0].failed_at_statement, Some(3));
    }

    #[tokio::test]
    async fn test_cancel_before_start_writes_nothing() {
        let (exec, history) = executor();
        let mut conn = MockConnection::default();
        let token = CancellationToken::new();
        token.cancel();

        let err = exec
            .execute(&mut conn, request(five_statements()), Some(&token), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(conn.events().is_empty());
        assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_begin_failure_is_connection_error() {
        let (exec, history) = executor();
        let mut conn = MockConnection {
            fail_begin: true,
            ..Default::default()
        };
        let err = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ConnectionFailed { ref target, .. } if target == "app"));
        assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_empty_script_rejected() {
        let (exec, _history) = executor();
        let mut conn = MockConnection::default();
        let err = exec
            .execute(&mut conn, request(vec![]), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidScript(_)));
    }

    #[tokio::test]
    async fn test_commit_failure_recorded() {
        let (exec, history) = executor();
        let mut conn = MockConnection {
            fail_commit: true,
            ..Default::default()
        };
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.executed_statements, 5);
        assert!(result.failed_at_statement.is_none());
        assert_eq!(result.error_kind, Some(ExecutionErrorKind::ConstraintViolation));
        assert_eq!(conn.events().last().unwrap(), "ROLLBACK");
        assert_eq!(
            history.get(&result.migration_id).await.unwrap().status,
            MigrationStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let exec = MigrationExecutor::new(
            history.clone(),
            ExecutionConfig {
                transaction_timeout_secs: 5,
            },
        );
        let mut conn = MockConnection {
            hang_on: Some("t4".into()),
            ..Default::default()
        };
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.executed_statements, 3);
        assert_eq!(result.failed_at_statement, Some(4));
        assert_eq!(result.failed_statement.as_deref(), Some("CREATE TABLE t4 (id int)"));
        assert_eq!(result.error_kind, Some(ExecutionErrorKind::Timeout));
        assert!(!result.rollback_failed);
        let events = conn.events();
        assert_eq!(&events[events.len() - 2..], ["CANCEL", "ROLLBACK"]);
        assert!(!events.iter().any(|e| e.contains("t5")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_commit_times_out() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let exec = MigrationExecutor::new(
            history.clone(),
            ExecutionConfig {
                transaction_timeout_secs: 5,
            },
        );
        let mut conn = MockConnection {
            hang_commit: true,
            ..Default::default()
        };
        let started = tokio::time::Instant::now();
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(!result.success);
        assert_eq!(result.executed_statements, 5);
        assert!(result.failed_at_statement.is_none());
        assert_eq!(result.error_kind, Some(ExecutionErrorKind::Timeout));
        assert!(!conn.events().contains(&"COMMIT".to_string()));
        assert_eq!(&conn.events()[6..], ["CANCEL", "ROLLBACK"]);

        let rec = history.get(&result.migration_id).await.unwrap();
        assert_eq!(rec.status, MigrationStatus::Failed);
        assert_eq!(rec.error_kind, Some(ExecutionErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_begin_is_connection_error() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let exec = MigrationExecutor::new(
            history.clone(),
            ExecutionConfig {
                transaction_timeout_secs: 5,
            },
        );
        let mut conn = MockConnection {
            hang_begin: true,
            ..Default::default()
        };
        let err = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ConnectionFailed { ref message, .. } if message.contains("BEGIN did not complete")
        ));
        assert_eq!(conn.events(), vec!["CANCEL", "ROLLBACK"]);
        assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let (exec, history) = executor();
        let mut conn = MockConnection {
            fail_on: Some("t2".into()),
            fail_rollback: true,
            ..Default::default()
        };
        let result = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.rollback_failed);
        assert_eq!(result.failed_at_statement, Some(2));
        assert!(!result.message.contains("all changes were rolled back"));
        assert!(result.message.contains("ROLLBACK could not be confirmed"));

        let rec = history.get(&result.migration_id).await.unwrap();
        assert!(rec.rollback_failed);
        assert_eq!(rec.message, result.message);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (exec, _history) = executor();
        let mut conn = MockConnection::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = exec
            .execute(&mut conn, request(five_statements()), None, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            assert_eq!(p.migration_id, result.migration_id);
            assert_eq!(p.total, 5);
            seen.push(p.index);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_history_failure_keeps_result() {
        let exec = MigrationExecutor::new(Arc::new(BrokenHistory), ExecutionConfig::default());
        let mut conn = MockConnection::default();
        let err = exec
            .execute(&mut conn, request(five_statements()), None, None)
            .await
            .unwrap_err();
        match err {
            ExecutionError::HistoryWrite { result, source } => {
                assert!(result.success);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_target_waits_for_running_migration() {
        let (exec, history) = executor();
        let exec = Arc::new(exec);
        let guard = exec.locks.acquire("app").await;

        let handle = {
            let exec = exec.clone();
            tokio::spawn(async move {
                let mut conn = MockConnection::default();
                exec.execute(&mut conn, request(five_statements()), None, None)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().total, 0);

        drop(guard);
        let result = handle.await.unwrap();
        assert!(result.success);
        assert_eq!(history.list(&HistoryQuery::default()).await.unwrap().total, 1);
    }

    #[test]
    fn test_result_json_shape() {
        let result = MigrationExecutionResult {
            success: true,
            migration_id: "m".into(),
            migration_name: "n".into(),
            timestamp: Utc::now(),
            executed_statements: 1,
            total_statements: 1,
            direction: Direction::Down,
            target_database: "app".into(),
            duration: Duration::from_millis(1500).into(),
            message: "ok".into(),
            rollback_failed: false,
            failed_at_statement: None,
            failed_statement: None,
            error_code: None,
            error_kind: None,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["direction"], "down");
        assert_eq!(json["duration"]["ms"], 1500);
        assert_eq!(json["duration"]["seconds"], 1.5);
        assert!(json.get("failedAtStatement").is_none());
        assert_eq!(json["rollbackFailed"], false);
    }
}
