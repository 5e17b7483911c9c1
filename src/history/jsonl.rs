use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{paginate, HistoryPage, HistoryQuery, HistoryStore, MigrationRecord};
use crate::error::HistoryError;

/// History appended as JSON lines to a single file.
pub struct JsonLinesHistoryStore {
    log_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl JsonLinesHistoryStore {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path: Arc::new(log_path),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Every parseable record in file order. Blank and malformed lines are skipped.
fn read_records(path: &Path) -> anyhow::Result<Vec<MigrationRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open history log: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read history log")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<MigrationRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!(
                    "Skipping malformed history line {} in {}: {}",
                    line_no + 1,
                    path.display(),
                    e
                );
            }
        }
    }

    Ok(records)
}

#[async_trait]
impl HistoryStore for JsonLinesHistoryStore {
    async fn append(&self, record: MigrationRecord) -> Result<(), HistoryError> {
        let path = self.log_path.clone();
        let lock = self.lock.clone();
        tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
            let _guard = lock.lock().map_err(|e| anyhow!("Lock error: {}", e))?;

            if read_records(&path)?.iter().any(|r| r.id == record.id) {
                return Err(HistoryError::DuplicateId(record.id));
            }

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create history log directory")?;
            }

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_path())
                .with_context(|| format!("Failed to open history log: {}", path.display()))?;

            let json = serde_json::to_string(&record).context("Failed to serialize record")?;
            writeln!(file, "{}", json).context("Failed to append history record")?;
            file.sync_data().context("Failed to flush history log")?;
            Ok(())
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn list(&self, query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
        let path = self.log_path.clone();
        let lock = self.lock.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || -> Result<HistoryPage, HistoryError> {
            let _guard = lock.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            Ok(paginate(read_records(&path)?, &query))
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn get(&self, id: &str) -> Result<MigrationRecord, HistoryError> {
        let path = self.log_path.clone();
        let lock = self.lock.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<MigrationRecord, HistoryError> {
            let _guard = lock.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            read_records(&path)?
                .into_iter()
                .find(|r| r.id == id)
                .ok_or(HistoryError::NotFound(id))
        })
        .await
        .context("spawn_blocking join error")?
    }
}
