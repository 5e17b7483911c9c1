pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod security;

pub use config::{AppConfig, HistoryBackend};
pub use db::connectors::ConnectionInfo;
pub use db::comparator::{compare_schemas, diff, DiffResult, DiffSummary, SchemaDifferences};
pub use db::generator::{generate_down, generate_up, GeneratedMigration, MigrationGenerator, RiskLevel};
pub use db::migrator::{
    CancellationToken, Direction, ExecutionConfig, MigrationExecutionResult, MigrationExecutor,
};
pub use db::schema::Schema;
pub use pipeline::{ConnectionTestResult, MigrationPlan, SchemaSync};

/// Install `env_logger` with an `info` default, overridable through
/// `RUST_LOG`. Later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
