//! Manager trait and event types
//!
//! Managers are the extension units of Weave. Each one contributes analysis
//! during `process`, prompt context during state assembly, and side effects
//! during `post_process`. The engine only ever sees `Arc<dyn Manager>`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::state::{State, StateData, StateUpdates};
use crate::types::Fragment;

pub use crate::types::ManagerId;

/// Event raised by a manager for its registered handler
#[derive(Debug, Clone)]
pub struct EventData {
    /// Type of the event being triggered
    pub event_type: String,
    /// Associated payload
    pub data: serde_json::Value,
}

impl EventData {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Callback invoked with manager events
pub type EventHandler = Arc<dyn Fn(EventData) -> Result<(), EngineError> + Send + Sync>;

/// Trait that all managers must implement
///
/// # Concurrency
///
/// `process` runs concurrently with every other selected manager. It receives a
/// read-only snapshot of the state and a private [`StateUpdates`] buffer; writes
/// recorded there are applied only after all managers succeed. A manager must
/// never rely on another manager's `process` output.
///
/// `post_process` runs sequentially in execution order and may mutate the state
/// directly; later managers see earlier managers' changes.
///
/// # Cancellation
///
/// A cancelled `process` is dropped at its next await point. Writes a manager
/// already made to external stores are not rolled back, so such writes should be
/// idempotent (upserts keyed by deterministic ids).
#[async_trait]
pub trait Manager: Send + Sync {
    /// Returns the unique identifier for this manager
    fn id(&self) -> ManagerId;

    /// Identifiers of managers that must be registered before this one
    fn dependencies(&self) -> Vec<ManagerId> {
        Vec::new()
    }

    /// Analyze the inbound state
    async fn process(&self, _state: &State, _updates: &mut StateUpdates) -> Result<(), EngineError> {
        Ok(())
    }

    /// Perform actions based on the outbound state
    async fn post_process(&self, _state: &mut State) -> Result<(), EngineError> {
        Ok(())
    }

    /// Collect manager-specific context for the current state
    async fn context(&self, state: &State) -> Result<Vec<StateData>, EngineError>;

    /// Persist a fragment into the manager's own storage
    async fn store(&self, _fragment: &Fragment) -> Result<(), EngineError> {
        Ok(())
    }

    /// Run background work; spawned once per engine start and not awaited
    async fn start_background_processes(&self) {}

    /// Signal background work to stop; must not block
    fn stop_background_processes(&self) {}

    /// Set the callback used for manager events
    fn register_event_handler(&self, _handler: EventHandler) {}
}
