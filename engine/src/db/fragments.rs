/// Fragment persistence
///
/// One store per fragment table. Single-fragment reads go through a TTL cache
/// keyed `fragment:<table>:<id>`; upserts refresh the entry and every other
/// write invalidates it.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::store::{sort_by_distance, FragmentFilter, FragmentStore};
use sdk::types::{Fragment, Id, Metadata};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use super::{db_error, from_millis, parse_id, to_millis};
use crate::cache::{CacheConfig, CacheStats, TtlCache};

const COLUMNS: &str =
    "id, actor_id, session_id, content, metadata, embedding, created_at, updated_at, deleted_at";

/// Fragment tables created by the migrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentTable {
    Interactions,
    Insights,
    Personality,
}

impl FragmentTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentTable::Interactions => "interaction_fragments",
            FragmentTable::Insights => "insight_fragments",
            FragmentTable::Personality => "personality_fragments",
        }
    }
}

/// A session and the time of its latest fragment
#[derive(Debug, Clone, PartialEq)]
pub struct SessionActivity {
    pub session_id: Id,
    pub last_active: DateTime<Utc>,
    pub fragments: i64,
}

/// SQLite fragment store
pub struct SqliteFragmentStore {
    pool: SqlitePool,
    table: FragmentTable,
    cache: TtlCache<String, Fragment>,
}

impl SqliteFragmentStore {
    pub fn new(pool: SqlitePool, table: FragmentTable, cache: CacheConfig) -> Self {
        Self {
            pool,
            table,
            cache: TtlCache::new(cache),
        }
    }

    pub fn table(&self) -> FragmentTable {
        self.table
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn cache_key(&self, id: Id) -> String {
        format!("fragment:{}:{}", self.table.as_str(), id)
    }

    /// Sessions an actor wrote in, most recently active first
    pub async fn sessions_for_actor(
        &self,
        actor_id: Id,
        limit: usize,
    ) -> Result<Vec<SessionActivity>, EngineError> {
        let sql = format!(
            "SELECT session_id, MAX(created_at) AS last_active, COUNT(*) AS fragments FROM {} \
             WHERE actor_id = ? AND deleted_at IS NULL \
             GROUP BY session_id ORDER BY last_active DESC LIMIT ?",
            self.table.as_str()
        );
        let rows = sqlx::query(&sql)
            .bind(actor_id.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(SessionActivity {
                    session_id: parse_id(&row.try_get::<String, _>("session_id").map_err(db_error)?)?,
                    last_active: from_millis(row.try_get("last_active").map_err(db_error)?)?,
                    fragments: row.try_get("fragments").map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn fetch(&self, builder: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<Fragment>, EngineError> {
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_fragment).collect()
    }

    fn select(&self) -> QueryBuilder<'static, Sqlite> {
        QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL",
            COLUMNS,
            self.table.as_str()
        ))
    }

    /// Run an UPDATE on a live fragment; missing or deleted rows are an error
    async fn update_column(&self, id: Id, column: &str, value: String) -> Result<(), EngineError> {
        let sql = format!(
            "UPDATE {} SET {} = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
            self.table.as_str(),
            column
        );
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.cache.delete(&self.cache_key(id));
        if result.rows_affected() == 0 {
            return Err(EngineError::FragmentNotFound(id));
        }
        Ok(())
    }
}

fn row_to_fragment(row: &SqliteRow) -> Result<Fragment, EngineError> {
    let metadata: String = row.try_get("metadata").map_err(db_error)?;
    let embedding: Option<String> = row.try_get("embedding").map_err(db_error)?;
    let deleted_at: Option<i64> = row.try_get("deleted_at").map_err(db_error)?;

    Ok(Fragment {
        id: parse_id(&row.try_get::<String, _>("id").map_err(db_error)?)?,
        actor_id: parse_id(&row.try_get::<String, _>("actor_id").map_err(db_error)?)?,
        session_id: parse_id(&row.try_get::<String, _>("session_id").map_err(db_error)?)?,
        content: row.try_get("content").map_err(db_error)?,
        metadata: serde_json::from_str::<Metadata>(&metadata)?,
        embedding: embedding
            .map(|raw| serde_json::from_str::<Vec<f32>>(&raw))
            .transpose()?,
        actor: None,
        session: None,
        created_at: Some(from_millis(row.try_get("created_at").map_err(db_error)?)?),
        updated_at: Some(from_millis(row.try_get("updated_at").map_err(db_error)?)?),
        deleted_at: deleted_at.map(from_millis).transpose()?,
    })
}

#[async_trait]
impl FragmentStore for SqliteFragmentStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Fragment>, EngineError> {
        let key = self.cache_key(id);
        if let Some(fragment) = self.cache.get(&key) {
            return Ok(Some(fragment));
        }

        let mut builder = self.select();
        builder.push(" AND id = ").push_bind(id.to_string());
        let fragment = self.fetch(&mut builder).await?.into_iter().next();

        if let Some(fragment) = &fragment {
            self.cache.set(key, fragment.clone());
        }
        Ok(fragment)
    }

    async fn upsert(&self, fragment: &Fragment) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut stored = fragment.clone();
        stored.created_at = stored.created_at.or(Some(now));
        stored.updated_at = Some(now);
        stored.deleted_at = None;

        let embedding = stored
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL) \
             ON CONFLICT(id) DO UPDATE SET \
                actor_id = excluded.actor_id, \
                session_id = excluded.session_id, \
                content = excluded.content, \
                metadata = excluded.metadata, \
                embedding = excluded.embedding, \
                created_at = excluded.created_at, \
                updated_at = excluded.updated_at, \
                deleted_at = NULL",
            self.table.as_str(),
            COLUMNS
        );
        sqlx::query(&sql)
            .bind(stored.id.to_string())
            .bind(stored.actor_id.to_string())
            .bind(stored.session_id.to_string())
            .bind(&stored.content)
            .bind(serde_json::to_string(&stored.metadata)?)
            .bind(embedding)
            .bind(stored.created_at.map(to_millis))
            .bind(to_millis(now))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        debug!(table = self.table.as_str(), fragment = %stored.id, "Upserted fragment");

        // Cached copies carry no snapshots, like rows read back from the table
        stored.actor = None;
        stored.session = None;
        self.cache.set(self.cache_key(stored.id), stored);
        Ok(())
    }

    async fn get_by_session(&self, session_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        let mut builder = self.select();
        builder
            .push(" AND session_id = ")
            .push_bind(session_id.to_string())
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit as i64);
        self.fetch(&mut builder).await
    }

    async fn get_by_actor(&self, actor_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        let mut builder = self.select();
        builder
            .push(" AND actor_id = ")
            .push_bind(actor_id.to_string())
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit as i64);
        self.fetch(&mut builder).await
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        session_id: Id,
        limit: usize,
    ) -> Result<Vec<Fragment>, EngineError> {
        let mut builder = self.select();
        builder
            .push(" AND embedding IS NOT NULL AND session_id = ")
            .push_bind(session_id.to_string());

        let mut fragments = self.fetch(&mut builder).await?;
        fragments.retain(|f| f.distance_to(embedding).is_some());
        sort_by_distance(&mut fragments, embedding);
        fragments.truncate(limit);
        Ok(fragments)
    }

    async fn search_by_filter(&self, filter: &FragmentFilter) -> Result<Vec<Fragment>, EngineError> {
        let mut builder = self.select();
        if let Some(actor_id) = filter.actor_id {
            builder.push(" AND actor_id = ").push_bind(actor_id.to_string());
        }
        if let Some(session_id) = filter.session_id {
            builder
                .push(" AND session_id = ")
                .push_bind(session_id.to_string());
        }
        if let Some(start) = filter.start_time {
            builder.push(" AND created_at >= ").push_bind(to_millis(start));
        }
        if let Some(end) = filter.end_time {
            builder.push(" AND created_at <= ").push_bind(to_millis(end));
        }

        // Ordering and limit can only move into SQL when nothing is evaluated in Rust
        let sql_ordered = filter.embedding.is_none() && filter.metadata.is_empty();
        if sql_ordered {
            builder.push(" ORDER BY created_at DESC");
            if filter.limit > 0 {
                builder.push(" LIMIT ").push_bind(filter.limit as i64);
            }
        }

        let mut fragments = self.fetch(&mut builder).await?;
        if !sql_ordered {
            fragments.retain(|f| filter.matches(f));
            filter.sort_and_limit(&mut fragments);
        }
        Ok(fragments)
    }

    async fn update_metadata(&self, id: Id, metadata: Metadata) -> Result<(), EngineError> {
        self.update_column(id, "metadata", serde_json::to_string(&metadata)?)
            .await
    }

    async fn update_content(&self, id: Id, content: &str) -> Result<(), EngineError> {
        self.update_column(id, "content", content.to_string()).await
    }

    async fn update_embedding(&self, id: Id, embedding: Vec<f32>) -> Result<(), EngineError> {
        self.update_column(id, "embedding", serde_json::to_string(&embedding)?)
            .await
    }

    async fn update_id(&self, old_id: Id, new_id: Id) -> Result<(), EngineError> {
        let sql = format!("UPDATE {} SET id = ? WHERE id = ?", self.table.as_str());
        let result = sqlx::query(&sql)
            .bind(new_id.to_string())
            .bind(old_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.cache.delete(&self.cache_key(old_id));
        self.cache.delete(&self.cache_key(new_id));
        if result.rows_affected() == 0 {
            return Err(EngineError::FragmentNotFound(old_id));
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError> {
        let sql = format!(
            "UPDATE {} SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
            self.table.as_str()
        );
        sqlx::query(&sql)
            .bind(to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.cache.delete(&self.cache_key(id));
        Ok(())
    }

    async fn delete_by_session(&self, session_id: Id) -> Result<(), EngineError> {
        let sql = format!(
            "UPDATE {} SET deleted_at = ? WHERE session_id = ? AND deleted_at IS NULL RETURNING id",
            self.table.as_str()
        );
        let ids: Vec<String> = sqlx::query_scalar(&sql)
            .bind(to_millis(Utc::now()))
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        for id in ids {
            self.cache.delete(&format!("fragment:{}:{}", self.table.as_str(), id));
        }
        Ok(())
    }
}
