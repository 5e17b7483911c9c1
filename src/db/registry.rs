use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::migrator::CancellationToken;

/// One mutex per target database. Holding the guard means owning the only
/// in-flight execution against that target.
#[derive(Default)]
pub struct ExecutionLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, target: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until no other execution holds `target`.
    pub async fn acquire(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(target);
        match lock.clone().try_lock_owned() {
            Ok(guard) => {
                log::debug!("Execution lock acquired for '{}'", target);
                guard
            }
            Err(_) => {
                log::info!("Waiting for running migration on '{}' to finish", target);
                let guard = lock.lock_owned().await;
                log::info!("Execution lock acquired for '{}'", target);
                guard
            }
        }
    }

    pub fn is_locked(&self, target: &str) -> bool {
        let lock = self.lock_for(target);
        let held = lock.try_lock().is_err();
        held
    }
}

/// Cancellation tokens of queued executions, keyed by migration name. A name
/// is held by at most one execution at a time.
pub struct MigrationState {
    tokens: HashMap<String, CancellationToken>,
}

impl MigrationState {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    /// Returns false, leaving the held token alone, if `name` is taken.
    pub fn try_insert(&mut self, name: String, token: CancellationToken) -> bool {
        match self.tokens.entry(name) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(token);
                true
            }
        }
    }

    pub fn cancel(&self, id: &str) -> bool {
        if let Some(token) = self.tokens.get(id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.tokens.remove(id);
    }
}

impl Default for MigrationState {
    fn default() -> Self {
        Self::new()
    }
}
