//! Integration tests for the Process and PostProcess pipelines

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{entries, new_log, Behavior, Harness, Recorder};
use sdk::errors::{EngineError, Phase};
use sdk::manager::{Manager, ManagerId};
use sdk::state::{State, StateData, StateDataKey, StateUpdates};
use sdk::store::FragmentStore;
use sdk::types::MetadataExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_post_process_follows_override_order() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("m1", &log)),
        Arc::new(Recorder::new("m2", &log)),
    ])
    .await;
    let mut state = harness.state("hi");

    harness
        .engine
        .new_post_process_builder()
        .with_state(&mut state)
        .with_response(harness.reply("hello"))
        .with_manager_order(vec![ManagerId::new("m2"), ManagerId::new("m1")])
        .execute()
        .await
        .unwrap();

    assert_eq!(entries(&log), vec!["m2:post_process", "m1:post_process"]);
}

#[tokio::test]
async fn test_post_process_uses_engine_order() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("m1", &log)),
        Arc::new(Recorder::new("m2", &log)),
        Arc::new(Recorder::new("m3", &log)),
    ])
    .await;
    harness
        .engine
        .set_execution_order(vec![ManagerId::new("m3"), ManagerId::new("m1")])
        .unwrap();

    let mut state = harness.state("hi");
    harness
        .engine
        .post_process(harness.reply("hello"), &mut state)
        .await
        .unwrap();

    // Managers missing from an explicit order do not run
    assert_eq!(entries(&log), vec!["m3:post_process", "m1:post_process"]);
}

#[tokio::test]
async fn test_failing_process_names_manager_and_stores_nothing() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("ok", &log)),
        Arc::new(Recorder::new("broken", &log).on_process(Behavior::Fail)),
    ])
    .await;
    let mut state = harness.state("hi");
    let before = state.input.clone();

    let err = harness.engine.process(&mut state).await.unwrap_err();

    match &err {
        EngineError::ManagerFailed { manager, phase, .. } => {
            assert_eq!(manager, &ManagerId::new("broken"));
            assert_eq!(*phase, Phase::Process);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(harness.interactions.upserts(), 0);

    // Every manager still ran to completion
    let mut log = entries(&log);
    log.sort();
    assert_eq!(log, vec!["broken:process", "ok:process"]);

    // No partial writes reached the caller's state
    assert_eq!(state.input, before);
    assert!(state.get_custom_data("visited:ok").is_none());
}

#[tokio::test]
async fn test_panicking_manager_is_reported() {
    let log = new_log();
    let harness = Harness::new(vec![Arc::new(
        Recorder::new("wild", &log)
            .on_process(Behavior::Panic)
            .on_post_process(Behavior::Panic),
    )])
    .await;
    let mut state = harness.state("hi");

    let err = harness.engine.process(&mut state).await.unwrap_err();
    match err {
        EngineError::ManagerPanicked { manager, message, .. } => {
            assert_eq!(manager, ManagerId::new("wild"));
            assert!(message.contains("exploded"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let err = harness
        .engine
        .post_process(harness.reply("hello"), &mut state)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ManagerPanicked {
            phase: Phase::PostProcess,
            ..
        }
    ));
    assert_eq!(harness.interactions.upserts(), 0);
}

#[tokio::test]
async fn test_post_process_stops_at_first_error() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("m1", &log).on_post_process(Behavior::Fail)),
        Arc::new(Recorder::new("m2", &log)),
    ])
    .await;
    let mut state = harness.state("hi");

    let err = harness
        .engine
        .post_process(harness.reply("hello"), &mut state)
        .await
        .unwrap_err();

    assert_eq!(err.manager(), Some(&ManagerId::new("m1")));
    assert_eq!(entries(&log), vec!["m1:post_process"]);
    assert_eq!(harness.interactions.upserts(), 0);
}

#[tokio::test]
async fn test_process_normalizes_and_persists_input() {
    let log = new_log();
    let harness = Harness::new(vec![Arc::new(Recorder::new("m1", &log))]).await;
    let mut state = harness.state("hi");
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .with_metadata("channel", "dm")
        .with_created_at(created_at)
        .execute()
        .await
        .unwrap();

    assert_eq!(state.input.actor.as_ref().map(|a| a.name.as_str()), Some("alice"));
    assert!(state.input.session.is_some());
    assert_eq!(state.input.created_at, Some(created_at));
    assert_eq!(state.get_custom_data("visited:m1"), Some(&json!(true)));

    let stored = harness
        .interactions
        .get_by_id(state.input.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.metadata.get_str("channel"), "dm");
    assert_eq!(harness.interactions.upserts(), 1);
}

#[tokio::test]
async fn test_should_store_false_skips_persistence() {
    let harness = Harness::new(Vec::new()).await;
    let mut state = harness.state("hi");

    harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .should_store(false)
        .execute()
        .await
        .unwrap();

    assert_eq!(harness.interactions.upserts(), 0);
    assert!(state.input.actor.is_some());
}

#[tokio::test]
async fn test_unknown_actor_fails_before_managers_run() {
    let log = new_log();
    let harness = Harness::new(vec![Arc::new(Recorder::new("m1", &log))]).await;
    let mut state = State::new(sdk::types::Fragment::new(
        sdk::types::Id::new(),
        harness.session,
        "who am I",
    ));

    let err = harness.engine.process(&mut state).await.unwrap_err();

    assert!(matches!(err, EngineError::ActorNotFound(_)));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_validators_run_first() {
    let log = new_log();
    let harness = Harness::new(vec![Arc::new(Recorder::new("m1", &log))]).await;
    let mut state = harness.state("");

    let err = harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .with_validator(|state| {
            if state.input.content.is_empty() {
                return Err(EngineError::Validation("empty message".to_string()));
            }
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(ref m) if m == "empty message"));
    assert!(entries(&log).is_empty());
    assert_eq!(harness.interactions.upserts(), 0);
}

#[tokio::test]
async fn test_builders_require_inputs() {
    let harness = Harness::new(Vec::new()).await;

    let err = harness.engine.new_process_builder().execute().await.unwrap_err();
    assert!(matches!(err, EngineError::MissingInput("state")));

    let mut state = harness.state("hi");
    let err = harness
        .engine
        .new_post_process_builder()
        .with_state(&mut state)
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingInput("response")));
}

#[tokio::test]
async fn test_filters_select_managers() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("m1", &log)),
        Arc::new(Recorder::new("m2", &log)),
    ])
    .await;

    // The state's own selection applies when the builder has no filter
    let mut state = harness.state("hi");
    state.set_managers_to_process([ManagerId::new("m2")]);
    harness.engine.process(&mut state).await.unwrap();
    assert_eq!(entries(&log), vec!["m2:process"]);

    // A builder filter overrides it
    log.lock().unwrap().clear();
    let mut state = harness.state("again");
    state.set_managers_to_process([ManagerId::new("m2")]);
    harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .with_manager_filter(vec![ManagerId::new("m1")])
        .execute()
        .await
        .unwrap();
    assert_eq!(entries(&log), vec!["m1:process"]);

    // with_defaults selects everyone
    log.lock().unwrap().clear();
    let mut state = harness.state("third");
    state.set_managers_to_process([ManagerId::new("m2")]);
    harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .with_defaults()
        .execute()
        .await
        .unwrap();
    let mut ran = entries(&log);
    ran.sort();
    assert_eq!(ran, vec!["m1:process", "m2:process"]);
}

#[tokio::test]
async fn test_post_process_persists_output_under_response_id() {
    let harness = Harness::new(Vec::new()).await;
    let mut state = harness.state("hi");
    let reply = harness.reply("hello there");
    let reply_id = reply.id;

    harness
        .engine
        .new_post_process_builder()
        .with_state(&mut state)
        .with_response(reply)
        .with_metadata("kind", "reply")
        .execute()
        .await
        .unwrap();

    let output = state.output.as_ref().unwrap();
    assert_eq!(output.id, reply_id);
    assert_eq!(output.actor.as_ref().map(|a| a.assistant), Some(true));

    let stored = harness.interactions.get_by_id(reply_id).await.unwrap().unwrap();
    assert_eq!(stored.content, "hello there");
    assert_eq!(stored.metadata.get_str("kind"), "reply");
}

#[tokio::test]
async fn test_cancellation_discards_process() {
    let log = new_log();
    let harness = Harness::new(vec![
        Arc::new(Recorder::new("slow", &log).on_process(Behavior::Stall)),
        Arc::new(Recorder::new("fast", &log)),
    ])
    .await;
    let mut state = harness.state("hi");
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = harness
        .engine
        .new_process_builder()
        .with_state(&mut state)
        .with_cancellation(token)
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(harness.interactions.upserts(), 0);
    assert!(state.get_custom_data("visited:fast").is_none());
}

#[tokio::test]
async fn test_stopped_engine_rejects_work() {
    let harness = Harness::new(Vec::new()).await;
    harness.engine.start_background_processes();
    harness.engine.stop_background_processes();

    let mut state = harness.state("hi");
    let err = harness.engine.process(&mut state).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

/// Counts process calls and tags each input with a running total
struct GreetingCounter {
    calls: AtomicUsize,
}

const GREETING_COUNT: StateDataKey = StateDataKey::from_static("greeting_count");

#[async_trait]
impl Manager for GreetingCounter {
    fn id(&self) -> ManagerId {
        ManagerId::new("greeting")
    }

    async fn process(&self, _state: &State, updates: &mut StateUpdates) -> Result<(), EngineError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        updates.set_input_metadata("greeting_count", count);
        updates.add_manager_data(GREETING_COUNT, count);
        Ok(())
    }

    async fn context(&self, _state: &State) -> Result<Vec<StateData>, EngineError> {
        Ok(vec![StateData::new(
            GREETING_COUNT,
            self.calls.load(Ordering::SeqCst),
        )])
    }
}

#[tokio::test]
async fn test_end_to_end_two_messages() {
    let counter = Arc::new(GreetingCounter {
        calls: AtomicUsize::new(0),
    });
    let harness = Harness::new(vec![Arc::clone(&counter) as Arc<dyn Manager>]).await;
    let engine = &harness.engine;

    for (i, text) in ["hello", "hello again"].into_iter().enumerate() {
        let mut state = harness.state("");
        engine
            .populate_state(&mut state, harness.user, harness.session, text)
            .await
            .unwrap();
        assert_eq!(state.recent_interactions.len(), i);
        assert_eq!(state.get_manager_data(&GREETING_COUNT), Some(&json!(i)));

        engine.process(&mut state).await.unwrap();
        assert_eq!(state.input.metadata.get_f64("greeting_count"), (i + 1) as f64);
    }

    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    let stored = harness
        .interactions
        .get_by_session(harness.session, 10)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored
        .iter()
        .all(|f| f.metadata.contains_key("greeting_count")));

    // A generated reply round-trips through post-process
    let mut state = harness.state("");
    engine
        .populate_state(&mut state, harness.user, harness.session, "bye")
        .await
        .unwrap();
    let reply = engine
        .generate_response(
            vec![sdk::llm::Message::user("bye")],
            harness.session,
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.actor_id, engine.id());
    assert_eq!(reply.content, "echo: bye");
    engine.post_process(reply.clone(), &mut state).await.unwrap();
    assert!(engine.does_interaction_fragment_exist(reply.id).await.unwrap());
}

/// Manager whose process only returns once every peer has reached the barrier
struct Rendezvous {
    id: ManagerId,
    barrier: Arc<tokio::sync::Barrier>,
}

#[async_trait]
impl Manager for Rendezvous {
    fn id(&self) -> ManagerId {
        self.id.clone()
    }

    async fn process(&self, _state: &State, updates: &mut StateUpdates) -> Result<(), EngineError> {
        self.barrier.wait().await;
        updates.add_custom_data(format!("met:{}", self.id), true);
        Ok(())
    }

    async fn context(&self, _state: &State) -> Result<Vec<StateData>, EngineError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_process_runs_managers_concurrently() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let harness = Harness::new(vec![
        Arc::new(Rendezvous {
            id: ManagerId::new("left"),
            barrier: Arc::clone(&barrier),
        }),
        Arc::new(Rendezvous {
            id: ManagerId::new("right"),
            barrier: Arc::clone(&barrier),
        }),
    ])
    .await;

    // Sequential execution would block the first manager forever
    let mut state = harness.state("together");
    let result = tokio::time::timeout(Duration::from_secs(2), harness.engine.process(&mut state))
        .await
        .expect("process deadlocked");

    assert!(result.is_ok());
    assert_eq!(harness.interactions.upserts(), 1);
    assert_eq!(state.get_custom_data("met:left"), Some(&json!(true)));
    assert_eq!(state.get_custom_data("met:right"), Some(&json!(true)));
}
