//! Error types and handling
//!
//! This module provides the error type used throughout Weave. Every public entry
//! point of the engine returns a single `EngineError` that identifies the stage and,
//! where applicable, the manager at fault. All errors implement the `WeaveErrorExt`
//! trait which provides user-friendly hints and indicates whether errors are
//! recoverable.

use std::fmt;

use thiserror::Error;

use crate::types::{Id, ManagerId};

/// Trait for Weave error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait WeaveErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// identifiers, content, or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Configuration errors are never recoverable: the same call fails the same
    /// way until the registry or config is changed.
    fn is_recoverable(&self) -> bool;
}

/// Pipeline phase in which a manager was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// State assembly (`Manager::context`)
    Context,
    /// Inbound analysis (`Manager::process`)
    Process,
    /// Outbound actions (`Manager::post_process`)
    PostProcess,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Context => write!(f, "context"),
            Phase::Process => write!(f, "process"),
            Phase::PostProcess => write!(f, "post-process"),
        }
    }
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: registry mutations and config files; raised once, never retried
/// - **Resolution**: actor, session or fragment lookups that found nothing
/// - **Manager execution**: a manager returned an error or panicked
/// - **Persistence**: store and database failures, propagated verbatim
/// - **Validation**: builder validators that rejected a state
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, WeaveErrorExt};
/// use sdk::types::ManagerId;
///
/// let error = EngineError::DuplicateManager(ManagerId::new("insight"));
/// assert_eq!(error.to_string(), "duplicate manager with ID insight");
/// assert!(!error.is_recoverable());
///
/// let missing = EngineError::Store("connection reset".to_string());
/// assert!(missing.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("duplicate manager with ID {0}")]
    DuplicateManager(ManagerId),

    #[error("manager {manager} requires manager {dependency} which was not provided")]
    MissingDependency {
        manager: ManagerId,
        dependency: ManagerId,
    },

    #[error("manager {0} specified in order but not provided")]
    UnknownManager(ManagerId),

    #[error("manager {0} appears more than once in execution order")]
    DuplicateInExecutionOrder(ManagerId),

    // Resolution errors
    #[error("actor not found: {0}")]
    ActorNotFound(Id),

    #[error("session not found: {0}")]
    SessionNotFound(Id),

    #[error("fragment not found: {0}")]
    FragmentNotFound(Id),

    // Manager execution errors
    #[error("manager {manager} failed during {phase}: {source}")]
    ManagerFailed {
        manager: ManagerId,
        phase: Phase,
        #[source]
        source: Box<EngineError>,
    },

    #[error("manager {manager} panicked during {phase}: {message}")]
    ManagerPanicked {
        manager: ManagerId,
        phase: Phase,
        message: String,
    },

    /// Error raised by a manager's own logic
    #[error("Manager error: {0}")]
    Manager(String),

    // Builder errors
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} is required")]
    MissingInput(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap an error with the manager and phase it originated from
    pub fn manager_failed(manager: ManagerId, phase: Phase, source: EngineError) -> Self {
        Self::ManagerFailed {
            manager,
            phase,
            source: Box::new(source),
        }
    }

    /// The manager this error is attributed to, if any
    pub fn manager(&self) -> Option<&ManagerId> {
        match self {
            Self::ManagerFailed { manager, .. } | Self::ManagerPanicked { manager, .. } => {
                Some(manager)
            }
            _ => None,
        }
    }

    /// Whether this error was raised by a registry or config mutation
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::DuplicateManager(_)
                | Self::MissingDependency { .. }
                | Self::UnknownManager(_)
                | Self::DuplicateInExecutionOrder(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl WeaveErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::DuplicateManager(_) => "Each manager may only be registered once",
            Self::MissingDependency { .. } => {
                "Register the required manager before the one that depends on it"
            }
            Self::UnknownManager(_) => "The execution order names a manager that is not registered",
            Self::DuplicateInExecutionOrder(_) => "Each manager may appear once in an execution order",

            // Resolution errors
            Self::ActorNotFound(_) => "Create the actor before sending messages from it",
            Self::SessionNotFound(_) => "Create the session before sending messages to it",
            Self::FragmentNotFound(_) => "The requested message no longer exists",

            // Manager execution errors
            Self::ManagerFailed { .. } | Self::Manager(_) => "A manager failed. Check manager logs",
            Self::ManagerPanicked { .. } => "A manager crashed. Check manager logs",

            // Builder errors
            Self::Validation(_) => "The request was rejected by a validator",
            Self::MissingInput(_) => "The request is incomplete",
            Self::Cancelled => "The request was cancelled",

            // Persistence errors
            Self::Store(_) => "Storage operation failed. Try again",
            Self::Database(_) => "Database operation failed. Try again",

            // LLM provider errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::Serialization(_) => "Data could not be encoded or decoded",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::ManagerFailed { source, .. } => source.is_recoverable(),
            // Non-recoverable errors
            Self::Config(_)
            | Self::DuplicateManager(_)
            | Self::MissingDependency { .. }
            | Self::UnknownManager(_)
            | Self::DuplicateInExecutionOrder(_)
            | Self::MissingInput(_)
            | Self::ManagerPanicked { .. } => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
