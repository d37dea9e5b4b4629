//! Pool setup and transaction scoping for the SQLite store.

use std::path::Path;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{CoreError, Result};
use crate::migrations;

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pub(super) pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The pool must have been opened with foreign keys enforced; prefer
    /// [`from_path`](Self::from_path) which handles this.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Enables foreign key enforcement on every connection
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for outstanding connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run `f` inside a transaction, committing on success and rolling back
    /// on error.
    ///
    /// A failed rollback is escalated to [`CoreError::RollbackFailed`] since
    /// the database may be left holding partial state.
    pub(super) async fn with_tx<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, Result<T>>,
    {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::DatabaseError {
            operation: operation.to_string(),
            details: format!("Failed to begin transaction: {}", e),
        })?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await.map_err(|e| CoreError::DatabaseError {
                    operation: operation.to_string(),
                    details: format!("Failed to commit: {}", e),
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    return Err(CoreError::RollbackFailed {
                        operation: operation.to_string(),
                        cause: err.to_string(),
                        details: rb.to_string(),
                    });
                }
                Err(err)
            }
        }
    }
}
