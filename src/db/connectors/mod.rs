pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::schema::Schema;
use crate::error::{ExecutionErrorKind, ExtractionError};

/// Connection settings shared by extraction and execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// Namespace to introspect and to qualify generated DDL with
    pub schema_name: String,
    pub connection_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            schema_name: "public".to_string(),
            connection_timeout_secs: 30,
        }
    }
}

/// Why a single statement (or BEGIN/COMMIT/ROLLBACK) failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementFailure {
    pub kind: ExecutionErrorKind,
    /// SQLSTATE, when the server sent one
    pub code: Option<String>,
    pub message: String,
}

impl StatementFailure {
    pub fn new(kind: ExecutionErrorKind, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// One open session able to run a migration transaction. Statements run
/// strictly one at a time, in the order given.
#[async_trait]
pub trait MigrationConnection: Send {
    async fn begin(&mut self) -> Result<(), StatementFailure>;

    async fn execute(&mut self, statement: &str) -> Result<(), StatementFailure>;

    async fn commit(&mut self) -> Result<(), StatementFailure>;

    async fn rollback(&mut self) -> Result<(), StatementFailure>;

    /// Ask the server to abort whatever this session is running. Sent out of
    /// band, so it works while a statement or COMMIT is still in flight.
    async fn cancel(&mut self) -> Result<(), StatementFailure>;
}

/// What a connection attempt found at the other end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionInfo {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Produces schema snapshots and migration sessions for a connection string
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Read the full structure of the configured schema
    async fn extract_schema(&self, connection_string: &str) -> Result<Schema, ExtractionError>;

    /// Open a session for running a migration
    async fn open(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn MigrationConnection>, ExtractionError>;

    /// Connect, ask the server which database it is serving, disconnect.
    async fn test_connection(&self, connection_string: &str)
        -> Result<ConnectionInfo, ExtractionError>;
}
