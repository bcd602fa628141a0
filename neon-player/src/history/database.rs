//! Lazily opened history database
//!
//! Nothing touches the disk until the first query, so a player that never
//! plays anything never creates the file.

use crate::error::Result;
use neon_common::db::{init_database, init_memory_database};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Owner of the history connection pool
pub struct HistoryDatabase {
    location: Location,
    pool: OnceCell<SqlitePool>,
}

impl HistoryDatabase {
    /// Database file, created with its schema on first use
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            pool: OnceCell::new(),
        }
    }

    /// Private in-memory database, lost when closed
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.pool.initialized()
    }

    /// The pool, opening the database and creating the schema if needed
    pub async fn pool(&self) -> Result<&SqlitePool> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                match &self.location {
                    Location::File(path) => init_database(path).await,
                    Location::Memory => init_memory_database().await,
                }
            })
            .await?;
        Ok(pool)
    }

    /// Close the pool; a database that was never opened is left alone
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            if !pool.is_closed() {
                pool.close().await;
                info!("History database closed");
            }
        }
    }
}
