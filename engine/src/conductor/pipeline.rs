//! Process and PostProcess execution
//!
//! # Process
//!
//! Every selected manager runs in its own task against a shared read-only
//! snapshot of the state, recording writes into a private `StateUpdates`. All
//! tasks run to completion; the first error in completion order is returned.
//! Buffers are applied in execution order only when every manager succeeded, so
//! a failed or cancelled run leaves the caller's state and the store untouched.
//!
//! # PostProcess
//!
//! Managers run one after another on the caller's state and the first error
//! stops the pipeline. The response is persisted only after every manager
//! succeeded.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use sdk::errors::{EngineError, Phase};
use sdk::manager::ManagerId;
use sdk::state::{State, StateUpdates};
use sdk::types::{Fragment, Metadata};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::builder::Validator;
use super::Engine;

/// Settings shared by both pipelines, collected by the builders
pub(crate) struct PipelineOptions {
    pub filter: Option<Vec<ManagerId>>,
    pub order: Vec<ManagerId>,
    pub validators: Vec<Validator>,
    pub should_store: bool,
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
    pub cancellation: Option<CancellationToken>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            filter: None,
            order: Vec::new(),
            validators: Vec::new(),
            should_store: true,
            metadata: Metadata::new(),
            created_at: None,
            cancellation: None,
        }
    }
}

impl PipelineOptions {
    /// Whether the pipeline should run `id`; falls back to the state's own
    /// selection when no filter was given
    fn selects(&self, id: &ManagerId, state_selects: bool) -> bool {
        match &self.filter {
            Some(filter) if !filter.is_empty() => filter.contains(id),
            _ => state_selects,
        }
    }

    fn token(&self, engine: &Engine) -> CancellationToken {
        self.cancellation
            .clone()
            .unwrap_or_else(|| engine.shutdown_token())
    }

    fn validate(&self, state: &State) -> Result<(), EngineError> {
        for validator in &self.validators {
            validator(state).map_err(|e| match e {
                EngineError::Validation(_) => e,
                other => EngineError::Validation(other.to_string()),
            })?;
        }
        Ok(())
    }

    /// Copy of `fragment` with actor and session resolved, builder metadata
    /// merged and a creation time set
    async fn normalize(&self, engine: &Engine, fragment: &Fragment) -> Result<Fragment, EngineError> {
        let actor = engine.resolve_actor(fragment.actor_id).await?;
        let session = engine.resolve_session(fragment.session_id).await?;

        let mut normalized = fragment.clone();
        normalized.actor = Some(actor);
        normalized.session = Some(session);
        normalized
            .metadata
            .extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        normalized.created_at = self
            .created_at
            .or(normalized.created_at)
            .or_else(|| Some(Utc::now()));

        Ok(normalized)
    }
}

pub(crate) async fn run_process(
    engine: &Engine,
    state: &mut State,
    options: PipelineOptions,
) -> Result<(), EngineError> {
    let token = options.token(engine);
    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    options.validate(state)?;

    let input = options.normalize(engine, &state.input).await?;
    let managers = engine.resolve_managers(&options.order, |id| {
        options.selects(id, state.should_process_manager(id))
    })?;

    info!(
        input = %input.id,
        session = %input.session_id,
        managers = managers.len(),
        "Processing input"
    );

    let mut staged = state.clone();
    staged.input = input;
    let snapshot = Arc::new(staged);

    let mut tasks = JoinSet::new();
    let count = managers.len();
    for (index, manager) in managers.into_iter().enumerate() {
        let snapshot = Arc::clone(&snapshot);
        tasks.spawn(async move {
            let id = manager.id();
            let mut updates = StateUpdates::new();
            let outcome = AssertUnwindSafe(manager.process(&snapshot, &mut updates))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(())) => Ok(updates),
                Ok(Err(e)) => Err(EngineError::manager_failed(id, Phase::Process, e)),
                Err(panic) => Err(EngineError::ManagerPanicked {
                    manager: id,
                    phase: Phase::Process,
                    message: panic_message(panic),
                }),
            };
            (index, result)
        });
    }

    let mut buffers: Vec<Option<StateUpdates>> = (0..count).map(|_| None).collect();
    let mut first_error = None;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tasks.abort_all();
                warn!(input = %snapshot.input.id, "Process cancelled");
                return Err(EngineError::Cancelled);
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok((index, Ok(updates))) => buffers[index] = Some(updates),
                    Ok((_, Err(e))) => {
                        error!(input = %snapshot.input.id, error = %e, "Manager process failed");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(EngineError::Manager(format!(
                                "manager task failed: {}",
                                e
                            )));
                        }
                    }
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let mut staged = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());
    for updates in buffers.into_iter().flatten() {
        staged.apply_updates(updates);
    }

    if options.should_store {
        engine.interactions.upsert(&staged.input).await?;
    }

    *state = staged;
    Ok(())
}

pub(crate) async fn run_post_process(
    engine: &Engine,
    state: &mut State,
    response: Fragment,
    options: PipelineOptions,
) -> Result<(), EngineError> {
    let token = options.token(engine);
    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    options.validate(state)?;

    let output = options.normalize(engine, &response).await?;
    let managers = engine.resolve_managers(&options.order, |id| {
        options.selects(id, state.should_post_process_manager(id))
    })?;

    info!(
        response = %response.id,
        session = %response.session_id,
        managers = managers.len(),
        "Post-processing response"
    );

    state.output = Some(output);

    for manager in managers {
        let id = manager.id();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!(response = %response.id, "Post-process cancelled");
                return Err(EngineError::Cancelled);
            }
            outcome = AssertUnwindSafe(manager.post_process(state)).catch_unwind() => outcome,
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let e = EngineError::manager_failed(id, Phase::PostProcess, e);
                error!(response = %response.id, error = %e, "Manager post-process failed");
                return Err(e);
            }
            Err(panic) => {
                return Err(EngineError::ManagerPanicked {
                    manager: id,
                    phase: Phase::PostProcess,
                    message: panic_message(panic),
                });
            }
        }
    }

    if options.should_store {
        match state.output.as_mut() {
            Some(output) => {
                output.id = response.id;
                engine.interactions.upsert(output).await?;
            }
            None => warn!(response = %response.id, "Output cleared by a manager; nothing stored"),
        }
    }

    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
