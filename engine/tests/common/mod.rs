//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::llm::{CompletionRequest, LlmClient, Message, StructuredOutputRequest};
use sdk::manager::{Manager, ManagerId};
use sdk::state::{State, StateData, StateDataKey, StateUpdates};
use sdk::store::{FragmentFilter, FragmentStore};
use sdk::types::{Fragment, Id, Metadata};
use weave_engine::store::memory::{MemoryActorStore, MemoryFragmentStore, MemorySessionStore};
use weave_engine::Engine;

/// LLM double: echoes the last message and embeds text by its length
pub struct StubLlm;

#[async_trait]
impl LlmClient for StubLlm {
    async fn generate_completion(&self, request: CompletionRequest) -> Result<Message, EngineError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(Message::assistant(format!("echo: {}", last)))
    }

    async fn generate_structured_output(
        &self,
        _request: StructuredOutputRequest,
    ) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::json!({ "new_insights": [], "outdated_insight_ids": [] }))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        Ok(vec![1.0, text.len() as f32])
    }
}

/// Fragment store that counts upserts and delegates to memory
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryFragmentStore,
    upserts: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl CountingStore {
    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Make every later `delete_by_id` fail
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FragmentStore for CountingStore {
    async fn get_by_id(&self, id: Id) -> Result<Option<Fragment>, EngineError> {
        self.inner.get_by_id(id).await
    }

    async fn upsert(&self, fragment: &Fragment) -> Result<(), EngineError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(fragment).await
    }

    async fn get_by_session(&self, session_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        self.inner.get_by_session(session_id, limit).await
    }

    async fn get_by_actor(&self, actor_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError> {
        self.inner.get_by_actor(actor_id, limit).await
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        session_id: Id,
        limit: usize,
    ) -> Result<Vec<Fragment>, EngineError> {
        self.inner.search_similar(embedding, session_id, limit).await
    }

    async fn search_by_filter(&self, filter: &FragmentFilter) -> Result<Vec<Fragment>, EngineError> {
        self.inner.search_by_filter(filter).await
    }

    async fn update_metadata(&self, id: Id, metadata: Metadata) -> Result<(), EngineError> {
        self.inner.update_metadata(id, metadata).await
    }

    async fn update_content(&self, id: Id, content: &str) -> Result<(), EngineError> {
        self.inner.update_content(id, content).await
    }

    async fn update_embedding(&self, id: Id, embedding: Vec<f32>) -> Result<(), EngineError> {
        self.inner.update_embedding(id, embedding).await
    }

    async fn update_id(&self, old_id: Id, new_id: Id) -> Result<(), EngineError> {
        self.inner.update_id(old_id, new_id).await
    }

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(EngineError::Store(format!("cannot delete {}", id)));
        }
        self.inner.delete_by_id(id).await
    }

    async fn delete_by_session(&self, session_id: Id) -> Result<(), EngineError> {
        self.inner.delete_by_session(session_id).await
    }
}

/// What a [`Recorder`] does when called
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    /// Sleep long enough for a test to cancel
    Stall,
}

/// Manager that appends `"<id>:<phase>"` to a shared log
pub struct Recorder {
    id: ManagerId,
    dependencies: Vec<ManagerId>,
    log: Arc<Mutex<Vec<String>>>,
    process: Behavior,
    post_process: Behavior,
    context: Vec<(StateDataKey, serde_json::Value)>,
}

impl Recorder {
    pub fn new(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: ManagerId::new(id),
            dependencies: Vec::new(),
            log: Arc::clone(log),
            process: Behavior::Succeed,
            post_process: Behavior::Succeed,
            context: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependencies.push(ManagerId::new(id));
        self
    }

    pub fn on_process(mut self, behavior: Behavior) -> Self {
        self.process = behavior;
        self
    }

    pub fn on_post_process(mut self, behavior: Behavior) -> Self {
        self.post_process = behavior;
        self
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.push((StateDataKey::new(key), value));
        self
    }

    fn record(&self, phase: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", self.id, phase));
    }

    async fn behave(&self, behavior: Behavior) -> Result<(), EngineError> {
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(EngineError::Manager(format!("{} failed", self.id))),
            Behavior::Panic => panic!("{} exploded", self.id),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Manager for Recorder {
    fn id(&self) -> ManagerId {
        self.id.clone()
    }

    fn dependencies(&self) -> Vec<ManagerId> {
        self.dependencies.clone()
    }

    async fn process(&self, _state: &State, updates: &mut StateUpdates) -> Result<(), EngineError> {
        self.record("process");
        updates.add_custom_data(format!("visited:{}", self.id), true);
        self.behave(self.process).await
    }

    async fn post_process(&self, _state: &mut State) -> Result<(), EngineError> {
        self.record("post_process");
        self.behave(self.post_process).await
    }

    async fn context(&self, _state: &State) -> Result<Vec<StateData>, EngineError> {
        self.record("context");
        Ok(self
            .context
            .iter()
            .map(|(key, value)| StateData::new(key.clone(), value.clone()))
            .collect())
    }
}

pub fn new_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Engine over in-memory stores with a counting interaction store
pub struct Harness {
    pub engine: Engine,
    pub interactions: Arc<CountingStore>,
    pub user: Id,
    pub session: Id,
}

impl Harness {
    pub async fn new(managers: Vec<Arc<dyn Manager>>) -> Self {
        let interactions = Arc::new(CountingStore::default());
        let engine = Engine::builder()
            .with_identity(Id::from_name("weave-test"), "Weave")
            .with_interaction_store(Arc::clone(&interactions) as Arc<dyn FragmentStore>)
            .with_actor_store(Arc::new(MemoryActorStore::new()))
            .with_session_store(Arc::new(MemorySessionStore::new()))
            .with_llm(Arc::new(StubLlm))
            .with_managers(managers)
            .build()
            .await
            .unwrap();

        let user = Id::new();
        let session = Id::new();
        engine.upsert_actor(user, "alice", false).await.unwrap();
        engine.upsert_session(session).await.unwrap();

        Self {
            engine,
            interactions,
            user,
            session,
        }
    }

    pub fn state(&self, text: &str) -> State {
        State::new(Fragment::new(self.user, self.session, text))
    }

    /// A reply fragment from the engine's own actor
    pub fn reply(&self, text: &str) -> Fragment {
        Fragment::new(self.engine.id(), self.session, text)
    }
}
