//! Actor repository

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::store::ActorStore;
use sdk::types::{Actor, Id};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{db_error, from_millis, parse_id, to_millis};

/// SQLite actor store
pub struct SqliteActorStore {
    pool: SqlitePool,
}

impl SqliteActorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_actor(row: &SqliteRow) -> Result<Actor, EngineError> {
    Ok(Actor {
        id: parse_id(&row.try_get::<String, _>("id").map_err(db_error)?)?,
        name: row.try_get("name").map_err(db_error)?,
        assistant: row.try_get("assistant").map_err(db_error)?,
        created_at: Some(from_millis(row.try_get("created_at").map_err(db_error)?)?),
        updated_at: Some(from_millis(row.try_get("updated_at").map_err(db_error)?)?),
    })
}

#[async_trait]
impl ActorStore for SqliteActorStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Actor>, EngineError> {
        let row = sqlx::query(
            "SELECT id, name, assistant, created_at, updated_at FROM actors WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_actor).transpose()
    }

    async fn upsert(&self, actor: &Actor) -> Result<(), EngineError> {
        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO actors (id, name, assistant, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                assistant = excluded.assistant,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(actor.id.to_string())
        .bind(&actor.name)
        .bind(actor.assistant)
        .bind(actor.created_at.map(to_millis).unwrap_or(now))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM actors WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Actor>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, name, assistant, created_at, updated_at FROM actors ORDER BY name LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_actor).collect()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Actor>, EngineError> {
        // LIKE is case-insensitive for ASCII in SQLite
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            r#"
            SELECT id, name, assistant, created_at, updated_at FROM actors
            WHERE name LIKE ? ESCAPE '\'
            ORDER BY name
            LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_actor).collect()
    }
}
