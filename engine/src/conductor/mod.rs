//! Conductor
//!
//! The [`Engine`] owns the manager registry and the stores, and drives a request
//! through its three stages:
//!
//! 1. **State assembly** ([`Engine::update_state`]): sequential manager context
//!    plus chronological and similarity-ranked history
//! 2. **Process** ([`Engine::process`]): concurrent manager analysis of the input,
//!    then persistence of the normalized input
//! 3. **PostProcess** ([`Engine::post_process`]): sequential manager side effects
//!    on the response, then persistence of the response
//!
//! Between 2 and 3 the caller generates a response, usually through
//! [`Engine::generate_response`].
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sdk::{Fragment, Id, LlmClient, State};
//! # use weave_engine::conductor::Engine;
//! # use weave_engine::store::memory::{MemoryActorStore, MemoryFragmentStore, MemorySessionStore};
//! # async fn run(llm: Arc<dyn LlmClient>) -> Result<(), sdk::EngineError> {
//! let engine = Engine::builder()
//!     .with_identity(Id::from_name("weave"), "Weave")
//!     .with_interaction_store(Arc::new(MemoryFragmentStore::new()))
//!     .with_actor_store(Arc::new(MemoryActorStore::new()))
//!     .with_session_store(Arc::new(MemorySessionStore::new()))
//!     .with_llm(llm)
//!     .build()
//!     .await?;
//!
//! let user = Id::from_name("alice");
//! let session = Id::from_name("dm:alice");
//! engine.upsert_actor(user, "alice", false).await?;
//! engine.upsert_session(session).await?;
//!
//! let mut state = State::new(Fragment::new(user, session, ""));
//! engine.populate_state(&mut state, user, session, "hello").await?;
//! engine.process(&mut state).await?;
//!
//! let response = engine.generate_response(Vec::new(), session, Vec::new()).await?;
//! engine.post_process(response, &mut state).await?;
//! # Ok(())
//! # }
//! ```

mod assembly;
mod builder;
mod pipeline;

pub use builder::{PostProcessBuilder, ProcessBuilder, Validator};

use std::sync::{Arc, RwLock};

use chrono::Utc;
use sdk::errors::EngineError;
use sdk::llm::{CompletionRequest, LlmClient, Message, ToolDefinition};
use sdk::manager::{Manager, ManagerId};
use sdk::state::State;
use sdk::store::{ActorStore, FragmentStore, SessionStore};
use sdk::types::{Actor, Fragment, Id, Session};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::registry::ManagerRegistry;

/// Request-processing runtime
pub struct Engine {
    id: Id,
    name: String,
    registry: RwLock<ManagerRegistry>,
    interactions: Arc<dyn FragmentStore>,
    actors: Arc<dyn ActorStore>,
    sessions: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmClient>,
    history: HistoryConfig,
    shutdown: CancellationToken,
}

/// Collects the engine's collaborators and validates them on `build`
#[derive(Default)]
pub struct EngineBuilder {
    identity: Option<(Id, String)>,
    interactions: Option<Arc<dyn FragmentStore>>,
    actors: Option<Arc<dyn ActorStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    managers: Vec<Arc<dyn Manager>>,
    execution_order: Vec<ManagerId>,
    history: HistoryConfig,
}

impl EngineBuilder {
    /// Id and display name of the assistant actor
    pub fn with_identity(mut self, id: Id, name: impl Into<String>) -> Self {
        self.identity = Some((id, name.into()));
        self
    }

    pub fn with_interaction_store(mut self, store: Arc<dyn FragmentStore>) -> Self {
        self.interactions = Some(store);
        self
    }

    pub fn with_actor_store(mut self, store: Arc<dyn ActorStore>) -> Self {
        self.actors = Some(store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Managers registered in the given order
    pub fn with_managers(mut self, managers: Vec<Arc<dyn Manager>>) -> Self {
        self.managers = managers;
        self
    }

    /// Explicit execution order for the pipelines
    pub fn with_manager_order(mut self, order: Vec<ManagerId>) -> Self {
        self.execution_order = order;
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Validate, register managers and upsert the assistant actor
    pub async fn build(self) -> Result<Engine, EngineError> {
        let (id, name) = self.identity.ok_or(EngineError::MissingInput("identity"))?;
        if name.is_empty() {
            return Err(EngineError::MissingInput("name"));
        }
        let interactions = self
            .interactions
            .ok_or(EngineError::MissingInput("interaction fragment store"))?;
        let actors = self.actors.ok_or(EngineError::MissingInput("actor store"))?;
        let sessions = self
            .sessions
            .ok_or(EngineError::MissingInput("session store"))?;
        let llm = self.llm.ok_or(EngineError::MissingInput("llm client"))?;

        let mut registry = ManagerRegistry::new();
        registry.register_all(self.managers)?;
        registry.set_execution_order(self.execution_order)?;

        let engine = Engine {
            id,
            name,
            registry: RwLock::new(registry),
            interactions,
            actors,
            sessions,
            llm,
            history: self.history,
            shutdown: CancellationToken::new(),
        };

        engine.upsert_actor(engine.id, &engine.name, true).await?;
        info!(agent = %engine.name, id = %engine.id, "Engine ready");

        Ok(engine)
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Id of the assistant actor
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> HistoryConfig {
        self.history
    }

    pub fn interaction_store(&self) -> &Arc<dyn FragmentStore> {
        &self.interactions
    }

    /// Token cancelled by [`Engine::stop_background_processes`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a manager on a running engine
    pub fn add_manager(&self, manager: Arc<dyn Manager>) -> Result<(), EngineError> {
        self.registry
            .write()
            .expect("manager registry lock poisoned")
            .register(manager)
    }

    /// Replace the explicit execution order; empty restores registration order
    pub fn set_execution_order(&self, order: Vec<ManagerId>) -> Result<(), EngineError> {
        self.registry
            .write()
            .expect("manager registry lock poisoned")
            .set_execution_order(order)
    }

    /// Ids of every registered manager in registration order
    pub fn manager_ids(&self) -> Vec<ManagerId> {
        self.registry
            .read()
            .expect("manager registry lock poisoned")
            .managers()
            .iter()
            .map(|m| m.id())
            .collect()
    }

    /// Snapshot of the managers in registration order
    pub(crate) fn managers(&self) -> Vec<Arc<dyn Manager>> {
        self.registry
            .read()
            .expect("manager registry lock poisoned")
            .managers()
            .to_vec()
    }

    /// Snapshot of the managers a pipeline should run
    pub(crate) fn resolve_managers<F>(
        &self,
        override_order: &[ManagerId],
        selected: F,
    ) -> Result<Vec<Arc<dyn Manager>>, EngineError>
    where
        F: Fn(&ManagerId) -> bool,
    {
        self.registry
            .read()
            .expect("manager registry lock poisoned")
            .resolve(Some(override_order), selected)
    }

    /// Start a process builder for an inbound message
    pub fn new_process_builder(&self) -> ProcessBuilder<'_> {
        ProcessBuilder::new(self)
    }

    /// Start a post-process builder for an outbound response
    pub fn new_post_process_builder(&self) -> PostProcessBuilder<'_> {
        PostProcessBuilder::new(self)
    }

    /// Run every selected manager's analysis and persist the input
    pub async fn process(&self, state: &mut State) -> Result<(), EngineError> {
        self.new_process_builder().with_state(state).execute().await
    }

    /// Run every selected manager's side effects and persist the response
    pub async fn post_process(&self, response: Fragment, state: &mut State) -> Result<(), EngineError> {
        self.new_post_process_builder()
            .with_response(response)
            .with_state(state)
            .execute()
            .await
    }

    /// Embed `text`, install it as the state's input and assemble the state
    pub async fn populate_state(
        &self,
        state: &mut State,
        actor_id: Id,
        session_id: Id,
        text: &str,
    ) -> Result<(), EngineError> {
        let embedding = self.llm.embed_text(text).await?;
        let now = Utc::now();
        let mut input = Fragment::new(actor_id, session_id, text)
            .with_embedding(embedding)
            .with_created_at(now);
        input.updated_at = Some(now);

        self.populate_state_from_fragment(state, input).await
    }

    /// Install `fragment` as the state's input and assemble the state
    ///
    /// The input is only replaced if assembly succeeds.
    pub async fn populate_state_from_fragment(
        &self,
        state: &mut State,
        fragment: Fragment,
    ) -> Result<(), EngineError> {
        let mut staged = state.clone();
        staged.input = fragment;
        self.update_state(&mut staged).await?;
        *state = staged;
        Ok(())
    }

    /// Generate the assistant's reply for a session
    ///
    /// The returned fragment is owned by the engine's actor and carries the
    /// reply's embedding. It is not persisted; pass it to `post_process`.
    pub async fn generate_response(
        &self,
        messages: Vec<Message>,
        session_id: Id,
        tools: Vec<ToolDefinition>,
    ) -> Result<Fragment, EngineError> {
        let mut request = CompletionRequest::new(messages);
        request.tools = tools;

        let reply = self.llm.generate_completion(request).await?;
        let embedding = self.llm.embed_text(&reply.content).await?;

        let now = Utc::now();
        let mut fragment = Fragment::new(self.id, session_id, reply.content)
            .with_embedding(embedding)
            .with_created_at(now);
        fragment.updated_at = Some(now);

        debug!(fragment = %fragment.id, session = %session_id, "Generated response");
        Ok(fragment)
    }

    /// Spawn each manager's background work; returns immediately
    ///
    /// Tasks end on their own or when the engine is stopped.
    pub fn start_background_processes(&self) {
        for manager in self.managers() {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = manager.start_background_processes() => {}
                }
            });
        }
    }

    /// Signal every manager to stop and cancel in-flight pipelines
    pub fn stop_background_processes(&self) {
        for manager in self.managers() {
            manager.stop_background_processes();
        }
        self.shutdown.cancel();
        info!(agent = %self.name, "Background processes stopped");
    }

    pub async fn upsert_actor(&self, id: Id, name: &str, assistant: bool) -> Result<(), EngineError> {
        self.actors.upsert(&Actor::new(id, name, assistant)).await
    }

    pub async fn upsert_session(&self, id: Id) -> Result<(), EngineError> {
        self.sessions.upsert(&Session::new(id)).await
    }

    pub async fn upsert_interaction_fragment(&self, fragment: &Fragment) -> Result<(), EngineError> {
        self.interactions.upsert(fragment).await
    }

    pub async fn does_interaction_fragment_exist(&self, id: Id) -> Result<bool, EngineError> {
        Ok(self.interactions.get_by_id(id).await?.is_some())
    }

    pub(crate) async fn resolve_actor(&self, id: Id) -> Result<Actor, EngineError> {
        self.actors
            .get_by_id(id)
            .await?
            .ok_or(EngineError::ActorNotFound(id))
    }

    pub(crate) async fn resolve_session(&self, id: Id) -> Result<Session, EngineError> {
        self.sessions
            .get_by_id(id)
            .await?
            .ok_or(EngineError::SessionNotFound(id))
    }
}
