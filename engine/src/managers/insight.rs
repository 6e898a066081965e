//! Insight manager
//!
//! During `process` the manager asks the LLM to extract durable facts from the
//! conversation, stores them as fragments in its own store and deletes the ones
//! the model marks as outdated. During state assembly it publishes three lists:
//!
//! - [`SESSION_INSIGHTS`]: facts about the current session
//! - [`ACTOR_INSIGHTS`]: facts about the sender that hold across sessions
//! - [`UNIQUE_INSIGHTS`]: insights similar to the input that neither list has
//!
//! The lists are cached per session and sender so assembly does not hit the
//! store on every request.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::llm::{generate_structured, LlmClient, Message, ModelType, StructuredOutputRequest};
use sdk::manager::{EventData, EventHandler, Manager, ManagerId};
use sdk::state::{State, StateData, StateDataKey, StateUpdates};
use sdk::store::{ActorStore, FragmentFilter, FragmentStore, MetadataCondition};
use sdk::types::{Actor, Fragment, Id, MetadataExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, TtlCache};

pub const SESSION_INSIGHTS: StateDataKey = StateDataKey::from_static("session_insights");
pub const ACTOR_INSIGHTS: StateDataKey = StateDataKey::from_static("actor_insights");
pub const UNIQUE_INSIGHTS: StateDataKey = StateDataKey::from_static("unique_insights");

/// Existing insights loaded per list
const INSIGHT_LIMIT: usize = 10;
/// Insights similar to the input
const SIMILAR_LIMIT: usize = 3;
/// Session messages shown to the model
const HISTORY_LIMIT: usize = 20;

const SYSTEM_PROMPT: &str = "\
You extract concrete, factual insights from conversations.
Only extract information that is stated explicitly. Never speculate.

Rules:
1. Do not repeat insights already listed under existing insights.
2. When new information contradicts an existing insight, put that insight's ID in outdated_insight_ids.
3. Each insight holds exactly one piece of information.
4. Every insight names the actor it is about, using an actor ID from the conversation.
5. Returning no insights is fine when nothing new was said.

Types:
- session_insights: facts that only matter within this conversation
- actor_insights: facts about the actor that hold in any conversation

Categories: preference, technical_detail, personal_info, requirement, date_time, entity.
Confidence is between 0 and 1 and reflects how clearly the fact was stated.";

const EXAMPLES: &str = "\
EXAMPLE 1:
Conversation:
[10 minutes ago] Actor (ID: 123): I'm moving our billing service from Python to Rust, it has to ship before the end of May.
[9 minutes ago] Assistant (ID: 456): Happy to help. Which part of the service are you starting with?

Extracted Insights:
SESSION INSIGHTS:
- Actor is porting a billing service from Python to Rust (Category: technical_detail, Confidence: 0.95)
- The port has to ship before the end of May (Category: date_time, Confidence: 0.90)

---
EXAMPLE 2:
Conversation:
[just now] Actor (ID: 123): Please keep answers short, I read them on my phone. I'm based in Lisbon.

Extracted Insights:
ACTOR INSIGHTS:
- Actor prefers short answers (Category: preference, Confidence: 0.90)
- Actor is based in Lisbon (Category: personal_info, Confidence: 0.90)

---";

/// Insight lists for one session and sender
#[derive(Debug, Clone, Default)]
struct InsightData {
    session: Vec<Fragment>,
    actor: Vec<Fragment>,
    similar: Vec<Fragment>,
}

impl InsightData {
    fn remove(&mut self, id: Id) {
        self.session.retain(|f| f.id != id);
        self.actor.retain(|f| f.id != id);
        self.similar.retain(|f| f.id != id);
    }

    /// Similar insights whose content appears in neither list, first occurrence kept
    fn unique(&self) -> Vec<&Fragment> {
        let mut seen: HashSet<&str> = self
            .session
            .iter()
            .chain(&self.actor)
            .map(|f| f.content.as_str())
            .collect();

        self.similar
            .iter()
            .filter(|&f| seen.insert(f.content.as_str()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    #[serde(default)]
    new_insights: Vec<ExtractedInsight>,
    #[serde(default)]
    outdated_insight_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedInsight {
    content: String,
    category: String,
    confidence: f64,
    #[serde(default)]
    source_context: String,
    actor_id: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Extracts, stores and publishes conversation insights
pub struct InsightManager {
    insights: Arc<dyn FragmentStore>,
    interactions: Arc<dyn FragmentStore>,
    actors: Arc<dyn ActorStore>,
    llm: Arc<dyn LlmClient>,
    cache: TtlCache<(Id, Id), InsightData>,
    event_handler: RwLock<Option<EventHandler>>,
}

impl InsightManager {
    pub const ID: &'static str = "insight";

    pub fn new(
        insights: Arc<dyn FragmentStore>,
        interactions: Arc<dyn FragmentStore>,
        actors: Arc<dyn ActorStore>,
        llm: Arc<dyn LlmClient>,
        cache: CacheConfig,
    ) -> Self {
        Self {
            insights,
            interactions,
            actors,
            llm,
            cache: TtlCache::new(cache),
            event_handler: RwLock::new(None),
        }
    }

    async fn load(&self, input: &Fragment) -> Result<InsightData, EngineError> {
        let session = self
            .insights
            .search_by_filter(&FragmentFilter {
                session_id: Some(input.session_id),
                metadata: vec![MetadataCondition::equals("type", SESSION_INSIGHTS.as_str())],
                limit: INSIGHT_LIMIT,
                ..Default::default()
            })
            .await?;

        let actor = self
            .insights
            .search_by_filter(&FragmentFilter {
                actor_id: Some(input.actor_id),
                metadata: vec![MetadataCondition::equals("type", ACTOR_INSIGHTS.as_str())],
                limit: INSIGHT_LIMIT,
                ..Default::default()
            })
            .await?;

        let similar = match &input.embedding {
            Some(embedding) => {
                self.insights
                    .search_similar(embedding, input.session_id, SIMILAR_LIMIT)
                    .await?
            }
            None => Vec::new(),
        };

        Ok(InsightData {
            session,
            actor,
            similar,
        })
    }

    /// Display names for every actor referenced by `fragments`
    async fn actor_names<'a>(
        &self,
        fragments: impl IntoIterator<Item = &'a Fragment>,
    ) -> Result<HashMap<Id, (String, bool)>, EngineError> {
        // Collected before awaiting; the future must stay Send
        let referenced: Vec<(Id, Option<Actor>)> = fragments
            .into_iter()
            .map(|f| (f.actor_id, f.actor.clone()))
            .collect();

        let mut names = HashMap::new();
        for (actor_id, known) in referenced {
            if names.contains_key(&actor_id) {
                continue;
            }
            let actor = match known {
                Some(actor) => Some(actor),
                None => self.actors.get_by_id(actor_id).await?,
            };
            let entry = actor
                .map(|a| (a.name, a.assistant))
                .unwrap_or_else(|| ("unknown".to_string(), false));
            names.insert(actor_id, entry);
        }
        Ok(names)
    }

    async fn render(&self, data: &InsightData) -> Result<Vec<StateData>, EngineError> {
        let unique = data.unique();
        let names = self
            .actor_names(data.session.iter().chain(&data.actor).chain(unique.iter().copied()))
            .await?;

        Ok(vec![
            StateData::new(SESSION_INSIGHTS, format_insights(&data.session, &names)),
            StateData::new(ACTOR_INSIGHTS, format_insights(&data.actor, &names)),
            StateData::new(
                UNIQUE_INSIGHTS,
                format_insights(unique.into_iter(), &names),
            ),
        ])
    }

    fn emit(&self, event: EventData) {
        let handler = self
            .event_handler
            .read()
            .expect("event handler lock poisoned")
            .clone();
        if let Some(handler) = handler {
            if let Err(e) = handler(event) {
                warn!(manager = Self::ID, error = %e, "Event handler failed");
            }
        }
    }
}

#[async_trait]
impl Manager for InsightManager {
    fn id(&self) -> ManagerId {
        ManagerId::new(Self::ID)
    }

    async fn process(&self, state: &State, updates: &mut StateUpdates) -> Result<(), EngineError> {
        let input = &state.input;
        let mut data = self.load(input).await?;

        let mut history = self
            .interactions
            .get_by_session(input.session_id, HISTORY_LIMIT)
            .await?;
        history.reverse();
        history.retain(|f| f.id != input.id);
        history.push(input.clone());

        let names = self
            .actor_names(history.iter().chain(&data.session).chain(&data.actor))
            .await?;
        let conversation = format_history(&history, &names, Utc::now());
        let existing = format_existing(&data, &names);

        let request = StructuredOutputRequest {
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(format!("Here are examples of good insights:\n{}", EXAMPLES)),
                Message::user(format!(
                    "Please analyze this conversation:\n{}\nExisting insights:\n{}",
                    conversation, existing
                )),
            ],
            model_type: ModelType::Advanced,
            temperature: 0.0,
            schema_name: "insight_extraction".to_string(),
            schema: response_schema(),
            strict_schema: true,
        };
        let response: InsightResponse = generate_structured(self.llm.as_ref(), request).await?;

        let mut stored = 0usize;
        for insight in response.new_insights {
            let key = if insight.kind == SESSION_INSIGHTS.as_str() {
                SESSION_INSIGHTS
            } else if insight.kind == ACTOR_INSIGHTS.as_str() {
                ACTOR_INSIGHTS
            } else {
                warn!(kind = %insight.kind, "Skipping insight of unknown type");
                continue;
            };

            let actor_id = insight.actor_id.parse::<Id>().unwrap_or_else(|_| {
                debug!(actor_id = %insight.actor_id, "Insight names an unknown actor id; using sender");
                input.actor_id
            });

            let embedding = match self.llm.embed_text(&insight.content).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!(error = %e, "Failed to embed insight; skipping");
                    continue;
                }
            };

            let fragment = Fragment::new(actor_id, input.session_id, insight.content)
                .with_embedding(embedding)
                .with_metadata("type", json!(key.as_str()))
                .with_metadata("category", json!(insight.category))
                .with_metadata("confidence", json!(insight.confidence))
                .with_metadata("source_context", json!(insight.source_context))
                .with_metadata("timestamp", json!(Utc::now().timestamp()))
                .with_created_at(Utc::now());
            self.insights.upsert(&fragment).await?;
            stored += 1;

            if key == SESSION_INSIGHTS {
                data.session.push(fragment);
            } else {
                data.actor.push(fragment);
            }
        }

        let mut removed = 0usize;
        for raw in response.outdated_insight_ids {
            let Ok(id) = raw.parse::<Id>() else {
                warn!(id = %raw, "Ignoring malformed outdated insight id");
                continue;
            };
            match self.insights.delete_by_id(id).await {
                Ok(()) => {
                    data.remove(id);
                    removed += 1;
                }
                Err(e) => warn!(insight = %id, error = %e, "Failed to delete outdated insight"),
            }
        }

        info!(
            session = %input.session_id,
            stored,
            removed,
            "Insight extraction finished"
        );

        for entry in self.render(&data).await? {
            updates.add_manager_data(entry.key, entry.value);
        }
        self.cache.set((input.session_id, input.actor_id), data);

        if stored > 0 || removed > 0 {
            self.emit(EventData::new(
                "insights_updated",
                json!({
                    "session_id": input.session_id,
                    "stored": stored,
                    "removed": removed,
                }),
            ));
        }

        Ok(())
    }

    async fn context(&self, state: &State) -> Result<Vec<StateData>, EngineError> {
        let key = (state.input.session_id, state.input.actor_id);
        let data = match self.cache.get(&key) {
            Some(data) => data,
            None => {
                let data = self.load(&state.input).await?;
                self.cache.set(key, data.clone());
                data
            }
        };
        self.render(&data).await
    }

    fn stop_background_processes(&self) {
        self.cache.close();
    }

    fn register_event_handler(&self, handler: EventHandler) {
        *self
            .event_handler
            .write()
            .expect("event handler lock poisoned") = Some(handler);
    }
}

fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "new_insights": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "category": {
                            "type": "string",
                            "enum": ["preference", "technical_detail", "personal_info", "requirement", "date_time", "entity"]
                        },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "source_context": { "type": "string" },
                        "actor_id": { "type": "string" },
                        "type": { "type": "string", "enum": ["session_insights", "actor_insights"] }
                    },
                    "required": ["content", "category", "confidence", "source_context", "actor_id", "type"],
                    "additionalProperties": false
                }
            },
            "outdated_insight_ids": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["new_insights", "outdated_insight_ids"],
        "additionalProperties": false
    })
}

fn format_insight(insight: &Fragment, names: &HashMap<Id, (String, bool)>) -> String {
    let name = names
        .get(&insight.actor_id)
        .map(|(name, _)| name.as_str())
        .unwrap_or("unknown");
    format!(
        "- {} (ID: {}, ActorID: {}, Actor: {}, Category: {}, Confidence: {:.2})",
        insight.content,
        insight.id,
        insight.actor_id,
        name,
        insight.metadata.get_str("category"),
        insight.metadata.get_f64("confidence"),
    )
}

fn format_insights<'a>(
    insights: impl IntoIterator<Item = &'a Fragment>,
    names: &HashMap<Id, (String, bool)>,
) -> String {
    insights
        .into_iter()
        .map(|insight| format_insight(insight, names))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_existing(data: &InsightData, names: &HashMap<Id, (String, bool)>) -> String {
    let mut sections = Vec::new();
    if !data.session.is_empty() {
        sections.push(format!("# Session Insights\n{}", format_insights(&data.session, names)));
    }
    if !data.actor.is_empty() {
        sections.push(format!("# Actor Insights\n{}", format_insights(&data.actor, names)));
    }
    sections.join("\n\n")
}

fn format_history(
    messages: &[Fragment],
    names: &HashMap<Id, (String, bool)>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match names.get(&message.actor_id) {
            Some((_, true)) => format!("Assistant (ID: {})", message.actor_id),
            Some((name, false)) => format!("{} (ID: {})", name, message.actor_id),
            None => format!("unknown (ID: {})", message.actor_id),
        };
        let ago = message
            .created_at
            .map(|created| time_ago(now, created))
            .unwrap_or_else(|| "just now".to_string());
        out.push_str(&format!("- [{}] {}: {}\n", ago, role, message.content));
    }
    out
}

fn time_ago(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    match minutes {
        m if m < 1 => "just now".to_string(),
        1 => "1 minute ago".to_string(),
        m if m < 60 => format!("{} minutes ago", m),
        m if m < 120 => "1 hour ago".to_string(),
        m => format!("{} hours ago", m / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryActorStore, MemoryFragmentStore};
    use chrono::Duration;
    use sdk::llm::CompletionRequest;
    use sdk::types::Actor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        response: serde_json::Value,
        requests: Mutex<Vec<StructuredOutputRequest>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_completion(&self, _: CompletionRequest) -> Result<Message, EngineError> {
            Ok(Message::assistant("unused"))
        }

        async fn generate_structured_output(
            &self,
            request: StructuredOutputRequest,
        ) -> Result<serde_json::Value, EngineError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }

        async fn embed_text(&self, _: &str) -> Result<Vec<f32>, EngineError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct Fixture {
        manager: InsightManager,
        insights: Arc<MemoryFragmentStore>,
        llm: Arc<ScriptedLlm>,
        session: Id,
    }

    async fn fixture(actor: Id, response: serde_json::Value) -> Fixture {
        let insights = Arc::new(MemoryFragmentStore::new());
        let actors = Arc::new(MemoryActorStore::new());
        actors.upsert(&Actor::new(actor, "alice", false)).await.unwrap();
        let llm = Arc::new(ScriptedLlm {
            response,
            requests: Mutex::new(Vec::new()),
        });

        let manager = InsightManager::new(
            Arc::clone(&insights) as Arc<dyn FragmentStore>,
            Arc::new(MemoryFragmentStore::new()),
            actors,
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            CacheConfig::default(),
        );

        Fixture {
            manager,
            insights,
            llm,
            session: Id::new(),
        }
    }

    fn insight(actor: Id, session: Id, content: &str, kind: &StateDataKey) -> Fragment {
        Fragment::new(actor, session, content)
            .with_metadata("type", json!(kind.as_str()))
            .with_metadata("category", json!("preference"))
            .with_metadata("confidence", json!(0.9))
            .with_created_at(Utc::now())
    }

    #[tokio::test]
    async fn test_process_stores_new_and_removes_outdated() {
        let actor = Id::new();
        let stale_id = Id::new();
        let f = fixture(
            actor,
            json!({
                "new_insights": [
                    {
                        "content": "Actor switched to Rust",
                        "category": "technical_detail",
                        "confidence": 0.95,
                        "source_context": "I moved everything to Rust",
                        "actor_id": actor.to_string(),
                        "type": "actor_insights"
                    },
                    {
                        "content": "ignored",
                        "category": "entity",
                        "confidence": 0.5,
                        "source_context": "",
                        "actor_id": actor.to_string(),
                        "type": "something_else"
                    }
                ],
                "outdated_insight_ids": [stale_id.to_string(), "not-an-id"]
            }),
        )
        .await;
        let stale = insight(actor, f.session, "Actor uses Go", &ACTOR_INSIGHTS).with_id(stale_id);
        f.insights.upsert(&stale).await.unwrap();

        let state = State::new(Fragment::new(actor, f.session, "I moved everything to Rust"));
        let mut updates = StateUpdates::new();
        f.manager.process(&state, &mut updates).await.unwrap();

        assert!(f.insights.get_by_id(stale_id).await.unwrap().is_none());
        let remaining = f.insights.get_by_actor(actor, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "Actor switched to Rust");
        assert!(remaining[0].embedding.is_some());

        let mut applied = state.clone();
        applied.apply_updates(updates);
        let actor_text = applied
            .get_manager_data(&ACTOR_INSIGHTS)
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(actor_text.contains("Actor switched to Rust"));
        assert!(!actor_text.contains("Actor uses Go"));

        let requests = f.llm.requests.lock().unwrap();
        assert_eq!(requests[0].schema_name, "insight_extraction");
        assert_eq!(requests[0].model_type, ModelType::Advanced);
        assert!(requests[0].messages[2].content.contains("Actor uses Go"));
        assert!(requests[0].messages[2].content.contains("alice (ID:"));
    }

    #[tokio::test]
    async fn test_context_lists_and_unique_insights() {
        let actor = Id::new();
        let f = fixture(actor, json!({})).await;
        let session_fact = insight(actor, f.session, "Deadline is Friday", &SESSION_INSIGHTS)
            .with_embedding(vec![1.0, 0.0]);
        let archived = insight(actor, f.session, "Prefers tabs", &ACTOR_INSIGHTS)
            .with_embedding(vec![0.0, 1.0])
            .with_metadata("type", json!("archived"));
        f.insights.upsert(&session_fact).await.unwrap();
        f.insights.upsert(&archived).await.unwrap();

        let input = Fragment::new(actor, f.session, "when is it due?").with_embedding(vec![1.0, 0.1]);
        let data = f.manager.context(&State::new(input)).await.unwrap();

        assert_eq!(data.len(), 3);
        let session_text = data[0].value.as_str().unwrap();
        assert!(session_text.contains("Deadline is Friday"));
        assert!(session_text.contains("Actor: alice"));
        assert!(session_text.contains("Confidence: 0.90"));
        assert_eq!(data[1].value.as_str(), Some(""));

        // Similarity finds both; only the one not already listed is unique
        let unique = data[2].value.as_str().unwrap();
        assert!(unique.contains("Prefers tabs"));
        assert!(!unique.contains("Deadline is Friday"));
    }

    #[tokio::test]
    async fn test_context_is_cached_per_session() {
        let actor = Id::new();
        let f = fixture(actor, json!({})).await;
        let state = State::new(Fragment::new(actor, f.session, "hi"));

        f.manager.context(&state).await.unwrap();
        f.insights
            .upsert(&insight(actor, f.session, "late fact", &SESSION_INSIGHTS))
            .await
            .unwrap();
        let cached = f.manager.context(&state).await.unwrap();

        assert_eq!(cached[0].value.as_str(), Some(""));
        assert_eq!(f.manager.cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_event_handler_receives_updates() {
        let actor = Id::new();
        let f = fixture(
            actor,
            json!({
                "new_insights": [{
                    "content": "Lives in Lisbon",
                    "category": "personal_info",
                    "confidence": 0.9,
                    "source_context": "I'm in Lisbon",
                    "actor_id": "not-a-uuid",
                    "type": "actor_insights"
                }],
                "outdated_insight_ids": []
            }),
        )
        .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        f.manager.register_event_handler(Arc::new(
            move |event: EventData| -> Result<(), EngineError> {
                assert_eq!(event.event_type, "insights_updated");
                assert_eq!(event.data["stored"], json!(1));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ));

        let state = State::new(Fragment::new(actor, f.session, "I'm in Lisbon"));
        f.manager.process(&state, &mut StateUpdates::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Unparseable actor ids fall back to the sender
        let stored = f.insights.get_by_actor(actor, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata.get_str("type"), "actor_insights");
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_an_error() {
        let actor = Id::new();
        let f = fixture(actor, json!({ "new_insights": "nope" })).await;
        let state = State::new(Fragment::new(actor, f.session, "hi"));

        let err = f
            .manager
            .process(&state, &mut StateUpdates::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LLMProvider(_)));
    }

    #[tokio::test]
    async fn test_stop_closes_cache() {
        let f = fixture(Id::new(), json!({})).await;
        f.manager.stop_background_processes();
        assert!(f.manager.cache.is_closed());
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now, now), "just now");
        assert_eq!(time_ago(now, now - Duration::minutes(1)), "1 minute ago");
        assert_eq!(time_ago(now, now - Duration::minutes(5)), "5 minutes ago");
        assert_eq!(time_ago(now, now - Duration::minutes(90)), "1 hour ago");
        assert_eq!(time_ago(now, now - Duration::hours(3)), "3 hours ago");
    }
}
