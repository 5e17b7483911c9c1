use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::migrator::MigrationExecutionResult;

/// Failures producing a `Schema` from a live database.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Failed to connect to database: {0}")]
    Connection(String),

    #[error("Schema query failed: {0}")]
    Query(String),

    #[error("Timed out after {0}s while connecting")]
    Timeout(u64),
}

/// Malformed or contradictory schema input.
#[derive(Debug, Error, PartialEq)]
pub enum DiffError {
    #[error("Duplicate table '{table}' in schema '{database}'")]
    DuplicateTable { database: String, table: String },

    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("Duplicate index '{index}' in table '{table}'")]
    DuplicateIndex { table: String, index: String },

    #[error("Duplicate constraint '{constraint}' in table '{table}'")]
    DuplicateConstraint { table: String, constraint: String },

    #[error("Invalid identifier in schema '{database}': {reason}")]
    InvalidIdentifier { database: String, reason: String },
}

/// A difference entry the generator cannot turn into DDL.
#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("Unsupported construct on '{object}': {reason}")]
    Unsupported { object: String, reason: String },

    #[error("Cannot recreate {kind} '{name}': original definition is unknown")]
    MissingDefinition { kind: &'static str, name: String },
}

/// Pre-flight and bookkeeping failures of the execution engine. Statement
/// failures are not errors; they are reported on `MigrationExecutionResult`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Migration was cancelled before the transaction opened")]
    Cancelled,

    #[error("Could not open a transaction on '{target}': {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("Migration finished but its history record could not be written: {source}")]
    HistoryWrite {
        result: Box<MigrationExecutionResult>,
        #[source]
        source: HistoryError,
    },

    #[error("Invalid migration script: {0}")]
    InvalidScript(String),

    #[error("A migration named '{0}' is already queued or running")]
    NameInUse(String),
}

/// Classification of a failed statement, derived from the SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    StatementSyntaxError,
    ConstraintViolation,
    Timeout,
    ConnectionLost,
    Database,
}

impl ExecutionErrorKind {
    /// Map a PostgreSQL SQLSTATE to a kind. `None` means the driver reported
    /// no code at all, which happens when the socket is gone.
    pub fn from_sqlstate(code: Option<&str>) -> Self {
        let Some(code) = code else {
            return ExecutionErrorKind::ConnectionLost;
        };
        match code {
            "57014" => ExecutionErrorKind::Timeout,
            c if c.starts_with("57P0") => ExecutionErrorKind::ConnectionLost,
            c if c.starts_with("08") => ExecutionErrorKind::ConnectionLost,
            c if c.starts_with("42") => ExecutionErrorKind::StatementSyntaxError,
            c if c.starts_with("23") => ExecutionErrorKind::ConstraintViolation,
            _ => ExecutionErrorKind::Database,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::StatementSyntaxError => "StatementSyntaxError",
            ExecutionErrorKind::ConstraintViolation => "ConstraintViolation",
            ExecutionErrorKind::Timeout => "Timeout",
            ExecutionErrorKind::ConnectionLost => "ConnectionLost",
            ExecutionErrorKind::Database => "Database",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "StatementSyntaxError" => Some(ExecutionErrorKind::StatementSyntaxError),
            "ConstraintViolation" => Some(ExecutionErrorKind::ConstraintViolation),
            "Timeout" => Some(ExecutionErrorKind::Timeout),
            "ConnectionLost" => Some(ExecutionErrorKind::ConnectionLost),
            "Database" => Some(ExecutionErrorKind::Database),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// History store failures.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Migration record '{0}' not found")]
    NotFound(String),

    #[error("Migration record '{0}' already exists")]
    DuplicateId(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything the orchestrating service can fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    History(#[from] HistoryError),
}
