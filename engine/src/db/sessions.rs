//! Session repository

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::store::SessionStore;
use sdk::types::{Id, Session};
use sqlx::{Row, SqlitePool};

use super::{db_error, from_millis, parse_id, to_millis};

/// SQLite session store
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Session>, EngineError> {
        let row = sqlx::query("SELECT id, created_at, updated_at FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Session {
            id: parse_id(&row.try_get::<String, _>("id").map_err(db_error)?)?,
            created_at: Some(from_millis(row.try_get("created_at").map_err(db_error)?)?),
            updated_at: Some(from_millis(row.try_get("updated_at").map_err(db_error)?)?),
        }))
    }

    async fn upsert(&self, session: &Session) -> Result<(), EngineError> {
        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.created_at.map(to_millis).unwrap_or(now))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_session_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let store = db.sessions();

        let session = Session::new(Id::new());
        assert!(store.get_by_id(session.id).await.unwrap().is_none());

        store.upsert(&session).await.unwrap();
        let first = store.get_by_id(session.id).await.unwrap().unwrap();

        store.upsert(&session).await.unwrap();
        let second = store.get_by_id(session.id).await.unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}
