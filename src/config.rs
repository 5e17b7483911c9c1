use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::connectors::ConnectorConfig;
use crate::db::migrator::ExecutionConfig;

/// Where execution records are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "camelCase")]
pub enum HistoryBackend {
    /// `history.db` inside `dir`
    Sqlite { dir: PathBuf },
    JsonLines { path: PathBuf },
    /// `schemasync.migration_history` inside each target database
    Database,
}

impl Default for HistoryBackend {
    fn default() -> Self {
        HistoryBackend::Sqlite {
            dir: PathBuf::from(".schemasync"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub connector: ConnectorConfig,
    pub execution: ExecutionConfig,
    pub history: HistoryBackend,
}

impl AppConfig {
    /// Read a JSON config file. Fields left out take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
