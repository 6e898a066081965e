//! Per-request state
//!
//! A `State` is created once per inbound message and threaded through state
//! assembly, `process` and `post_process`. It holds both structured manager data
//! (keyed by constants each manager owns) and free-form custom data for callers.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Actor, Fragment, ManagerId, Metadata};

/// Key under which a manager publishes context into the state
///
/// Keys are opaque to the engine; only managers agree on their meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDataKey(Cow<'static, str>);

impl StateDataKey {
    /// Key from a string literal, usable in `const` items
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateDataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single piece of manager-contributed context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    pub key: StateDataKey,
    pub value: Value,
}

impl StateData {
    pub fn new(key: StateDataKey, value: impl Into<Value>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Writes a manager wants applied to the state after `process`
///
/// During `process` every manager runs concurrently against the same read-only
/// state. Instead of mutating it, each manager records its writes here; the
/// engine applies all buffers in execution order once every manager succeeded,
/// and drops them all if any manager failed.
#[derive(Debug, Clone, Default)]
pub struct StateUpdates {
    manager_data: Vec<StateData>,
    custom_data: Vec<(String, Value)>,
    input_metadata: Metadata,
}

impl StateUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish manager data under `key`
    pub fn add_manager_data(&mut self, key: StateDataKey, value: impl Into<Value>) -> &mut Self {
        self.manager_data.push(StateData::new(key, value));
        self
    }

    /// Record a custom data entry
    pub fn add_custom_data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.custom_data.push((key.into(), value.into()));
        self
    }

    /// Set a metadata key on the input fragment before it is persisted
    pub fn set_input_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.input_metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.manager_data.is_empty() && self.custom_data.is_empty() && self.input_metadata.is_empty()
    }
}

/// Per-request context shared by every manager
#[derive(Debug, Clone)]
pub struct State {
    /// The inbound fragment; normalized in place by `process`
    pub input: Fragment,

    /// The outbound fragment; populated by `post_process`
    pub output: Option<Fragment>,

    /// The actor who sent the input, resolved during assembly
    pub actor: Option<Actor>,

    /// Most recent session fragments, newest first
    pub recent_interactions: Vec<Fragment>,

    /// Similarity-ranked fragments, followed by recent ones not already present
    pub relevant_interactions: Vec<Fragment>,

    manager_data: HashMap<StateDataKey, Value>,
    custom_data: HashMap<String, Value>,

    process_managers: Option<HashSet<ManagerId>>,
    post_process_managers: Option<HashSet<ManagerId>>,
}

impl State {
    /// Create a state around an inbound fragment
    pub fn new(input: Fragment) -> Self {
        Self {
            input,
            output: None,
            actor: None,
            recent_interactions: Vec::new(),
            relevant_interactions: Vec::new(),
            manager_data: HashMap::new(),
            custom_data: HashMap::new(),
            process_managers: None,
            post_process_managers: None,
        }
    }

    /// Merge manager data into the state; later entries overwrite earlier ones
    pub fn add_manager_data(&mut self, data: Vec<StateData>) -> &mut Self {
        for d in data {
            self.manager_data.insert(d.key, d.value);
        }
        self
    }

    /// Retrieve manager data by key
    pub fn get_manager_data(&self, key: &StateDataKey) -> Option<&Value> {
        self.manager_data.get(key)
    }

    /// All manager data currently held
    pub fn manager_data(&self) -> &HashMap<StateDataKey, Value> {
        &self.manager_data
    }

    /// Add a custom key-value pair for platform-specific or temporary data
    pub fn add_custom_data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }

    pub fn get_custom_data(&self, key: &str) -> Option<&Value> {
        self.custom_data.get(key)
    }

    /// Clear all manager and custom data
    pub fn reset(&mut self) {
        self.manager_data.clear();
        self.custom_data.clear();
    }

    /// Restrict `process` to the given managers
    pub fn set_managers_to_process<I>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = ManagerId>,
    {
        self.process_managers = Some(ids.into_iter().collect());
        self
    }

    /// Restrict `post_process` to the given managers
    pub fn set_managers_to_post_process<I>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = ManagerId>,
    {
        self.post_process_managers = Some(ids.into_iter().collect());
        self
    }

    /// Whether `process` should run the given manager; true when unrestricted
    pub fn should_process_manager(&self, id: &ManagerId) -> bool {
        self.process_managers
            .as_ref()
            .map_or(true, |selected| selected.is_empty() || selected.contains(id))
    }

    /// Whether `post_process` should run the given manager; true when unrestricted
    pub fn should_post_process_manager(&self, id: &ManagerId) -> bool {
        self.post_process_managers
            .as_ref()
            .map_or(true, |selected| selected.is_empty() || selected.contains(id))
    }

    /// Apply a manager's buffered `process` writes
    pub fn apply_updates(&mut self, updates: StateUpdates) {
        self.add_manager_data(updates.manager_data);
        self.custom_data.extend(updates.custom_data);
        self.input.metadata.extend(updates.input_metadata);
    }
}
