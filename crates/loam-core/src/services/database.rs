//! Shared database handle used by every store facade and worker.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};

use crate::db::Database;
use crate::error::{Error, Result};

/// Thread-safe, cloneable handle to the embedded database.
///
/// Every access takes the lock for the duration of one closure. Closures run
/// synchronously, so no network call can happen while the lock is held.
#[derive(Clone)]
pub struct SharedDatabase {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SharedDatabase {
    /// Open (or create) the database file at `db_path`.
    pub fn open_path(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` against the connection outside of an explicit transaction.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(db.connection())
    }

    /// Run `f` in a transaction, committing only if it returns `Ok`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.lock()?;
        let tx = db.connection_mut().transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
