//! One-shot execution builders
//!
//! Builders are plain values: configure them, then consume them with
//! `execute`. Nothing runs and nothing is validated until then.
//!
//! ```no_run
//! # use sdk::{EngineError, ManagerId, State};
//! # use weave_engine::conductor::Engine;
//! # async fn run(engine: &Engine, state: &mut State) -> Result<(), EngineError> {
//! engine
//!     .new_process_builder()
//!     .with_state(state)
//!     .with_manager_filter(vec![ManagerId::new("insight")])
//!     .with_metadata("channel", "dm")
//!     .with_validator(|state| {
//!         if state.input.content.is_empty() {
//!             return Err(EngineError::Validation("empty message".to_string()));
//!         }
//!         Ok(())
//!     })
//!     .execute()
//!     .await
//! # }
//! ```

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::manager::ManagerId;
use sdk::state::State;
use sdk::types::Fragment;
use tokio_util::sync::CancellationToken;

use super::pipeline::{run_post_process, run_process, PipelineOptions};
use super::Engine;

/// Check run against the state before any side effect
pub type Validator = Box<dyn Fn(&State) -> Result<(), EngineError> + Send + Sync>;

/// Configures and runs one Process invocation
pub struct ProcessBuilder<'a> {
    engine: &'a Engine,
    state: Option<&'a mut State>,
    options: PipelineOptions,
}

/// Configures and runs one PostProcess invocation
pub struct PostProcessBuilder<'a> {
    engine: &'a Engine,
    state: Option<&'a mut State>,
    response: Option<Fragment>,
    options: PipelineOptions,
}

/// Setters shared by both builders
macro_rules! pipeline_setters {
    () => {
        /// The state to run against
        pub fn with_state(mut self, state: &'a mut State) -> Self {
            self.state = Some(state);
            self
        }

        /// Run only these managers; overrides the state's own selection
        pub fn with_manager_filter(mut self, filter: Vec<ManagerId>) -> Self {
            self.options.filter = Some(filter);
            self
        }

        /// Run managers in this order instead of the engine's
        pub fn with_manager_order(mut self, order: Vec<ManagerId>) -> Self {
            self.options.order = order;
            self
        }

        /// Merge a metadata entry into the fragment before it is persisted
        pub fn with_metadata(
            mut self,
            key: impl Into<String>,
            value: impl Into<serde_json::Value>,
        ) -> Self {
            self.options.metadata.insert(key.into(), value.into());
            self
        }

        /// Creation time for the fragment, replacing any it carries
        pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
            self.options.created_at = Some(created_at);
            self
        }

        /// Add a check run before anything else; the first failure aborts
        pub fn with_validator<F>(mut self, validator: F) -> Self
        where
            F: Fn(&State) -> Result<(), EngineError> + Send + Sync + 'static,
        {
            self.options.validators.push(Box::new(validator));
            self
        }

        /// Whether to persist the fragment on success (default true)
        pub fn should_store(mut self, should_store: bool) -> Self {
            self.options.should_store = should_store;
            self
        }

        /// Token observed instead of the engine's shutdown token
        pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
            self.options.cancellation = Some(token);
            self
        }

        /// Every manager, the engine's order, storage on, creation time now
        pub fn with_defaults(mut self) -> Self {
            self.options.filter = Some(self.engine.manager_ids());
            self.options.order = Vec::new();
            self.options.should_store = true;
            self.options.created_at = Some(Utc::now());
            self
        }
    };
}

impl<'a> ProcessBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            state: None,
            options: PipelineOptions::default(),
        }
    }

    pipeline_setters!();

    pub async fn execute(self) -> Result<(), EngineError> {
        let state = self.state.ok_or(EngineError::MissingInput("state"))?;
        run_process(self.engine, state, self.options).await
    }
}

impl<'a> PostProcessBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            state: None,
            response: None,
            options: PipelineOptions::default(),
        }
    }

    pipeline_setters!();

    /// The response fragment to post-process
    pub fn with_response(mut self, response: Fragment) -> Self {
        self.response = Some(response);
        self
    }

    pub async fn execute(self) -> Result<(), EngineError> {
        let state = self.state.ok_or(EngineError::MissingInput("state"))?;
        let response = self.response.ok_or(EngineError::MissingInput("response"))?;
        run_post_process(self.engine, state, response, self.options).await
    }
}
