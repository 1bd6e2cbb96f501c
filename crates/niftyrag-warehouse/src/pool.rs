//! Pooled `DuckDB` connections keyed by access mode.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Access mode requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Default)]
struct IdleConnections {
    readers: Vec<Connection>,
    writers: Vec<Connection>,
}

impl IdleConnections {
    fn slot(&mut self, mode: AccessMode) -> &mut Vec<Connection> {
        match mode {
            AccessMode::ReadOnly => &mut self.readers,
            AccessMode::ReadWrite => &mut self.writers,
        }
    }
}

struct Shared {
    db_path: PathBuf,
    max_idle: usize,
    // Every pooled connection is cloned from this one so they share a single
    // database instance and see each other's commits.
    root: Mutex<Connection>,
    idle: Mutex<IdleConnections>,
}

/// Small connection pool; idle connections are reused per access mode.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Open the database at `path`, keeping at most `max_idle` idle
    /// connections per access mode.
    ///
    /// # Errors
    /// Returns an error when the database file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(&db_path)?;
        root.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(Self {
            shared: Arc::new(Shared {
                db_path,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(IdleConnections::default()),
            }),
        })
    }

    /// Check out a connection, opening a new one when none is idle.
    ///
    /// # Errors
    /// Returns an error when the database file cannot be opened or configured.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .shared
            .idle
            .lock()
            .expect("duckdb idle list mutex poisoned")
            .slot(mode)
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => {
                tracing::debug!(
                    path = %self.shared.db_path.display(),
                    ?mode,
                    "opening duckdb connection"
                );
                self.shared
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned")
                    .try_clone()?
            }
        };

        Ok(PooledConnection {
            mode,
            shared: Arc::clone(&self.shared),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.shared.db_path
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection {
    mode: AccessMode,
    shared: Arc<Shared>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Ok(mut idle) = self.shared.idle.lock() else {
            return;
        };
        let slot = idle.slot(self.mode);
        if slot.len() < self.shared.max_idle {
            slot.push(connection);
        }
    }
}
