//! In-memory stores
//!
//! Plain maps behind a lock. Semantics match the SQLite stores: upserts
//! replace by id, deletes are logical, and reads never return deleted rows.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::store::{
    sort_by_distance, sort_newest_first, ActorStore, FragmentFilter, FragmentStore, SessionStore,
};
use sdk::types::{Actor, Fragment, Id, Metadata, Session};

/// Fragment store backed by a `HashMap`
#[derive(Default)]
pub struct MemoryFragmentStore {
    fragments: RwLock<HashMap<Id, Fragment>>,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live fragments
    pub fn len(&self) -> usize {
        self.read().values().filter(|f| !f.is_deleted()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Id, Fragment>> {
        self.fragments.read().expect("fragment store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Id, Fragment>> {
        self.fragments.write().expect("fragment store lock poisoned")
    }

    fn collect<F>(&self, predicate: F) -> Vec<Fragment>
    where
        F: Fn(&Fragment) -> bool,
    {
        self.read()
            .values()
            .filter(|f| !f.is_deleted() && predicate(f))
            .cloned()
            .collect()
    }

    /// Apply `update` to a live fragment and bump `updated_at`
    fn modify<F>(&self, id: Id, update: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Fragment),
    {
        let mut fragments = self.write();
        match fragments.get_mut(&id) {
            Some(fragment) if !fragment.is_deleted() => {
                update(fragment);
                fragment.updated_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(EngineError::FragmentNotFound(id)),
        }
    }
}

#[async_trait]
impl FragmentStore for MemoryFragmentStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Fragment>, EngineError> {
        Ok(self.read().get(&id).filter(|f| !f.is_deleted()).cloned())
    }

    async fn upsert(&self, fragment: &Fragment) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut stored = fragment.clone();
        stored.created_at = stored.created_at.or(Some(now));
        stored.updated_at = Some(now);
        stored.deleted_at = None;
        self.write().insert(stored.id, stored);
        Ok(())
    }

    async fn get_by_session(&self, session_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        let mut fragments = self.collect(|f| f.session_id == session_id);
        sort_newest_first(&mut fragments);
        fragments.truncate(limit);
        Ok(fragments)
    }

    async fn get_by_actor(&self, actor_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        let mut fragments = self.collect(|f| f.actor_id == actor_id);
        sort_newest_first(&mut fragments);
        fragments.truncate(limit);
        Ok(fragments)
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        session_id: Id,
        limit: usize,
    ) -> Result<Vec<Fragment>, EngineError> {
        let mut fragments =
            self.collect(|f| f.session_id == session_id && f.distance_to(embedding).is_some());
        sort_by_distance(&mut fragments, embedding);
        fragments.truncate(limit);
        Ok(fragments)
    }

    async fn search_by_filter(&self, filter: &FragmentFilter) -> Result<Vec<Fragment>, EngineError> {
        let mut fragments = self.collect(|f| filter.matches(f));
        filter.sort_and_limit(&mut fragments);
        Ok(fragments)
    }

    async fn update_metadata(&self, id: Id, metadata: Metadata) -> Result<(), EngineError> {
        self.modify(id, |f| f.metadata = metadata)
    }

    async fn update_content(&self, id: Id, content: &str) -> Result<(), EngineError> {
        self.modify(id, |f| f.content = content.to_string())
    }

    async fn update_embedding(&self, id: Id, embedding: Vec<f32>) -> Result<(), EngineError> {
        self.modify(id, |f| f.embedding = Some(embedding))
    }

    async fn update_id(&self, old_id: Id, new_id: Id) -> Result<(), EngineError> {
        let mut fragments = self.write();
        if fragments.contains_key(&new_id) {
            return Err(EngineError::Store(format!("fragment {} already exists", new_id)));
        }
        let mut fragment = fragments
            .remove(&old_id)
            .ok_or(EngineError::FragmentNotFound(old_id))?;
        fragment.id = new_id;
        fragments.insert(new_id, fragment);
        Ok(())
    }

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError> {
        if let Some(fragment) = self.write().get_mut(&id) {
            fragment.deleted_at = fragment.deleted_at.or_else(|| Some(Utc::now()));
        }
        Ok(())
    }

    async fn delete_by_session(&self, session_id: Id) -> Result<(), EngineError> {
        let now = Utc::now();
        for fragment in self.write().values_mut() {
            if fragment.session_id == session_id {
                fragment.deleted_at = fragment.deleted_at.or(Some(now));
            }
        }
        Ok(())
    }
}

/// Actor store backed by a `HashMap`
#[derive(Default)]
pub struct MemoryActorStore {
    actors: RwLock<HashMap<Id, Actor>>,
}

impl MemoryActorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActorStore for MemoryActorStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Actor>, EngineError> {
        Ok(self
            .actors
            .read()
            .expect("actor store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn upsert(&self, actor: &Actor) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut actors = self.actors.write().expect("actor store lock poisoned");
        let created_at = actors
            .get(&actor.id)
            .and_then(|existing| existing.created_at)
            .or(actor.created_at)
            .unwrap_or(now);

        let mut stored = actor.clone();
        stored.created_at = Some(created_at);
        stored.updated_at = Some(now);
        actors.insert(stored.id, stored);
        Ok(())
    }

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError> {
        self.actors
            .write()
            .expect("actor store lock poisoned")
            .remove(&id);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Actor>, EngineError> {
        let mut actors: Vec<Actor> = self
            .actors
            .read()
            .expect("actor store lock poisoned")
            .values()
            .cloned()
            .collect();
        actors.sort_by(|a, b| a.name.cmp(&b.name));
        actors.truncate(limit);
        Ok(actors)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Actor>, EngineError> {
        let query = query.to_lowercase();
        let mut actors: Vec<Actor> = self
            .actors
            .read()
            .expect("actor store lock poisoned")
            .values()
            .filter(|a| a.name.to_lowercase().contains(&query))
            .cloned()
            .collect();
        actors.sort_by(|a, b| a.name.cmp(&b.name));
        actors.truncate(limit);
        Ok(actors)
    }
}

/// Session store backed by a `HashMap`
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Id, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Session>, EngineError> {
        Ok(self
            .sessions
            .read()
            .expect("session store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn upsert(&self, session: &Session) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        let created_at = sessions
            .get(&session.id)
            .and_then(|existing| existing.created_at)
            .or(session.created_at)
            .unwrap_or(now);

        sessions.insert(
            session.id,
            Session {
                id: session.id,
                created_at: Some(created_at),
                updated_at: Some(now),
            },
        );
        Ok(())
    }
}
