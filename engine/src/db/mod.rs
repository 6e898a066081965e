/// Database module for SQLite persistence
///
/// This module provides the SQLite-backed actor, session and fragment stores.
/// It uses sqlx with WAL mode for better concurrency. Similarity ranking and
/// metadata predicates run in Rust over rows narrowed down in SQL.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::cache::CacheConfig;

pub mod actors;
pub mod fragments;
pub mod sessions;

// Re-export commonly used types
pub use actors::SqliteActorStore;
pub use fragments::{FragmentTable, SqliteFragmentStore};
pub use sessions::SqliteSessionStore;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for better concurrency
    /// 3. Run migrations to set up the schema
    ///
    /// SQLite recovers from an unclean shutdown on its own when a leftover WAL
    /// file is found at open time.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations; every statement is idempotent
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close all connections
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        Ok(())
    }

    /// Fragment store over one fragment table
    pub fn fragments(&self, table: FragmentTable, cache: CacheConfig) -> SqliteFragmentStore {
        SqliteFragmentStore::new(self.pool.clone(), table, cache)
    }

    pub fn actors(&self) -> SqliteActorStore {
        SqliteActorStore::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SqliteSessionStore {
        SqliteSessionStore::new(self.pool.clone())
    }
}

/// Map a driver error into the engine's persistence error
pub(crate) fn db_error(e: sqlx::Error) -> EngineError {
    EngineError::Database(e.to_string())
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, EngineError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| EngineError::Database(format!("invalid timestamp: {}", millis)))
}

pub(crate) fn parse_id(raw: &str) -> Result<sdk::types::Id, EngineError> {
    raw.parse()
        .map_err(|e| EngineError::Database(format!("invalid id '{}': {}", raw, e)))
}
