//! Fragment, actor, session and identifier types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used for deterministic identifiers derived from names
const ID_NAMESPACE: &str = "weave";

/// Identifier of a fragment, actor or session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    /// Create a new random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive a stable identifier from a name
    ///
    /// The same name always yields the same identifier, which lets callers
    /// address external users or channels without a lookup table.
    pub fn from_name(name: &str) -> Self {
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, ID_NAMESPACE.as_bytes());
        Self(Uuid::new_v5(&namespace, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Id {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for manager instances
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerId(String);

impl ManagerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ManagerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Open key-value metadata attached to a fragment
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Typed accessors for metadata values
pub trait MetadataExt {
    /// String value for `key`, or `""` when absent or not a string
    fn get_str(&self, key: &str) -> &str;

    /// Numeric value for `key`, or `0.0` when absent or not a number
    fn get_f64(&self, key: &str) -> f64;

    /// Boolean value for `key`, or `false` when absent or not a boolean
    fn get_bool(&self, key: &str) -> bool;
}

impl MetadataExt for Metadata {
    fn get_str(&self, key: &str) -> &str {
        self.get(key).and_then(|v| v.as_str()).unwrap_or_default()
    }

    fn get_f64(&self, key: &str) -> f64 {
        self.get(key).and_then(|v| v.as_f64()).unwrap_or_default()
    }

    fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or_default()
    }
}

/// A participant in a conversation, human or agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Id,
    pub name: String,
    /// Whether this actor is the assistant itself
    pub assistant: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Actor {
    pub fn new(id: Id, name: impl Into<String>, assistant: bool) -> Self {
        Self {
            id,
            name: name.into(),
            assistant,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A conversation scope grouping fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Id,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            created_at: None,
            updated_at: None,
        }
    }
}

/// An atomic unit of conversation or derived knowledge
///
/// Messages, insights and personality excerpts are all fragments. The `actor`
/// and `session` snapshots are denormalized copies for display; the ids are the
/// source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Id,
    pub actor_id: Id,
    pub session_id: Id,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// Creation time; `None` until the fragment is normalized or persisted
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft-delete marker; deleted fragments are invisible to reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Fragment {
    /// Create a fragment with a fresh id and empty metadata
    pub fn new(actor_id: Id, session_id: Id, content: impl Into<String>) -> Self {
        Self {
            id: Id::new(),
            actor_id,
            session_id,
            content: content.into(),
            metadata: Metadata::new(),
            embedding: None,
            actor: None,
            session: None,
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Cosine distance between this fragment's embedding and `other`
    ///
    /// Returns `None` when the fragment has no embedding or the dimensions differ.
    pub fn distance_to(&self, other: &[f32]) -> Option<f32> {
        self.embedding
            .as_deref()
            .and_then(|embedding| cosine_distance(embedding, other))
    }
}

/// Cosine distance (`1 - cosine similarity`) between two vectors
///
/// Matches the ordering of pgvector's `<=>` operator: smaller is closer.
/// Zero vectors are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(1.0);
    }
    Some(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}
