//! Weave Engine Library
//!
//! Conversational memory and context orchestration for LLM agents. The engine
//! runs pluggable managers over every inbound and outbound message, assembles
//! prompt context from their output and the session history, and persists
//! fragments through the store contracts in `sdk`.
//!
//! It is used by both the `weave` binary and integration tests.

/// Bounded TTL cache
pub mod cache;

/// Configuration management module
pub mod config;

/// Manager registration and execution order
pub mod registry;

/// Engine, pipelines and execution builders
pub mod conductor;

/// In-memory store implementations
pub mod store;

/// Database persistence module
pub mod db;

/// Bundled managers
pub mod managers;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use conductor::{Engine, EngineBuilder};
