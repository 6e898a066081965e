//! Persistence contracts
//!
//! The engine never talks to a database directly. Actors, sessions and fragments
//! are reached through these traits; implementations must be safe for concurrent
//! use from many managers and many in-flight requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::{Actor, Fragment, Id, Metadata, Session};

/// Comparison applied to a metadata key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOperator {
    /// Value equals the condition value
    Equals,
    /// Value differs from the condition value (absent keys match)
    NotEquals,
    /// Key is present
    Contains,
    /// Value is one of the elements of the condition array
    In,
}

/// A predicate over one metadata key
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataCondition {
    pub key: String,
    pub value: Value,
    pub operator: MetadataOperator,
}

impl MetadataCondition {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operator: MetadataOperator::Equals,
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operator: MetadataOperator::NotEquals,
        }
    }

    pub fn contains(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
            operator: MetadataOperator::Contains,
        }
    }

    pub fn is_in(key: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            value: Value::Array(values),
            operator: MetadataOperator::In,
        }
    }

    /// Evaluate the condition against a metadata map
    ///
    /// Values are compared by their string form so that `"1"` and `1` match,
    /// mirroring JSON text extraction in SQL backends.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let actual = metadata.get(&self.key);
        match self.operator {
            MetadataOperator::Equals => actual.is_some_and(|v| loose_eq(v, &self.value)),
            MetadataOperator::NotEquals => !actual.is_some_and(|v| loose_eq(v, &self.value)),
            MetadataOperator::Contains => actual.is_some(),
            MetadataOperator::In => match (&self.value, actual) {
                (Value::Array(candidates), Some(v)) => candidates.iter().any(|c| loose_eq(v, c)),
                _ => false,
            },
        }
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    value_text(a) == value_text(b)
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query over fragments
///
/// Unset fields do not constrain the result. Results are ordered by embedding
/// distance when `embedding` is set, otherwise newest first.
#[derive(Debug, Clone, Default)]
pub struct FragmentFilter {
    pub actor_id: Option<Id>,
    pub session_id: Option<Id>,
    pub metadata: Vec<MetadataCondition>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    /// Maximum number of results; 0 means unlimited
    pub limit: usize,
}

impl FragmentFilter {
    /// Whether a fragment satisfies every predicate except ordering and limit
    pub fn matches(&self, fragment: &Fragment) -> bool {
        if fragment.is_deleted() {
            return false;
        }
        if self.actor_id.is_some_and(|id| id != fragment.actor_id) {
            return false;
        }
        if self.session_id.is_some_and(|id| id != fragment.session_id) {
            return false;
        }
        if let Some(start) = self.start_time {
            if fragment.created_at.map_or(true, |t| t < start) {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if fragment.created_at.map_or(true, |t| t > end) {
                return false;
            }
        }
        self.metadata.iter().all(|c| c.matches(&fragment.metadata))
    }

    /// Order and truncate already-matched fragments
    pub fn sort_and_limit(&self, fragments: &mut Vec<Fragment>) {
        match &self.embedding {
            Some(embedding) => sort_by_distance(fragments, embedding),
            None => sort_newest_first(fragments),
        }
        if self.limit > 0 {
            fragments.truncate(self.limit);
        }
    }
}

/// Sort fragments newest first
pub fn sort_newest_first(fragments: &mut [Fragment]) {
    fragments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Sort fragments by cosine distance to `embedding`; fragments without a
/// comparable embedding go last
pub fn sort_by_distance(fragments: &mut [Fragment], embedding: &[f32]) {
    fragments.sort_by(|a, b| {
        let da = a.distance_to(embedding).unwrap_or(f32::MAX);
        let db = b.distance_to(embedding).unwrap_or(f32::MAX);
        da.total_cmp(&db)
    });
}

/// Storage for fragments of one kind (interactions, insights, ...)
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Fetch a live fragment by id
    async fn get_by_id(&self, id: Id) -> Result<Option<Fragment>, EngineError>;

    /// Create or replace a fragment by id
    async fn upsert(&self, fragment: &Fragment) -> Result<(), EngineError>;

    /// Most recent fragments of a session, newest first
    async fn get_by_session(&self, session_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError>;

    /// Most recent fragments of an actor, newest first
    async fn get_by_actor(&self, actor_id: Id, limit: usize) -> Result<Vec<Fragment>, EngineError>;

    /// Fragments of a session nearest to `embedding`
    async fn search_similar(
        &self,
        embedding: &[f32],
        session_id: Id,
        limit: usize,
    ) -> Result<Vec<Fragment>, EngineError>;

    /// Fragments matching a filter
    async fn search_by_filter(&self, filter: &FragmentFilter) -> Result<Vec<Fragment>, EngineError>;

    /// Replace a fragment's metadata
    async fn update_metadata(&self, id: Id, metadata: Metadata) -> Result<(), EngineError>;

    /// Replace a fragment's content
    async fn update_content(&self, id: Id, content: &str) -> Result<(), EngineError>;

    /// Replace a fragment's embedding
    async fn update_embedding(&self, id: Id, embedding: Vec<f32>) -> Result<(), EngineError>;

    /// Re-key a fragment
    async fn update_id(&self, old_id: Id, new_id: Id) -> Result<(), EngineError>;

    /// Logically delete a fragment
    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError>;

    /// Logically delete every fragment of a session
    async fn delete_by_session(&self, session_id: Id) -> Result<(), EngineError>;
}

/// Storage for actors
#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn get_by_id(&self, id: Id) -> Result<Option<Actor>, EngineError>;

    async fn upsert(&self, actor: &Actor) -> Result<(), EngineError>;

    async fn delete_by_id(&self, id: Id) -> Result<(), EngineError>;

    /// Up to `limit` actors
    async fn list(&self, limit: usize) -> Result<Vec<Actor>, EngineError>;

    /// Actors whose name contains `query`, case-insensitively
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Actor>, EngineError>;
}

/// Storage for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_by_id(&self, id: Id) -> Result<Option<Session>, EngineError>;

    async fn upsert(&self, session: &Session) -> Result<(), EngineError>;
}
