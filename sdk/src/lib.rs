//! Weave SDK
//!
//! Shared library providing the contracts, types, and errors for Weave components.
//! This crate is used by both the engine and by independently developed managers.

/// Error types and handling
pub mod errors;

/// Fragment, actor, session and identifier types
pub mod types;

/// Per-request state threaded through the pipelines
pub mod state;

/// Manager trait and event types
pub mod manager;

/// Persistence contracts consumed by the engine
pub mod store;

/// LLM client contract and message types
pub mod llm;

// Re-export commonly used types
pub use errors::{EngineError, Phase, WeaveErrorExt};
pub use llm::{
    CompletionRequest, LlmClient, Message, MessageRole, ModelType, StructuredOutputRequest,
    ToolDefinition,
};
pub use manager::{EventData, EventHandler, Manager, ManagerId};
pub use state::{State, StateData, StateDataKey, StateUpdates};
pub use store::{
    ActorStore, FragmentFilter, FragmentStore, MetadataCondition, MetadataOperator, SessionStore,
};
pub use types::{Actor, Fragment, Id, Metadata, MetadataExt, Session};
