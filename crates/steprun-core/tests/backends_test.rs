// In-process state store and event bus behaviour, and coordinator cleanup

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::agent_state;
use serde_json::json;
use steprun_core::{
    AgentRuntimeCoordinator, AgentStatus, CreateOperationParams, EventBus, EventBusLimits,
    InMemoryEventBus, InMemoryStateStore, StateStore, StateStoreLimits, StepResult,
    StreamEventInput, StreamEventType,
};
use tokio::sync::{mpsc, watch};

fn step(index: u32, status: AgentStatus) -> StepResult {
    let mut state = agent_state("op-1");
    state.status = status;
    state.step_count = index + 1;
    StepResult {
        step_index: index,
        new_state: state,
        next_context: None,
        execution_time: 3,
        events: vec![],
    }
}

fn input(step_index: u32, n: u32) -> StreamEventInput {
    StreamEventInput::new(StreamEventType::StreamChunk, step_index, json!({ "n": n }))
}

// =============================================================================
// State store
// =============================================================================

#[tokio::test]
async fn test_metadata_tracks_every_save() {
    let store = InMemoryStateStore::new();
    store
        .create_operation_metadata("op-1", CreateOperationParams::default())
        .await
        .unwrap();

    let mut state = agent_state("op-1");
    state.status = AgentStatus::Running;
    state.step_count = 3;
    state.cost.total = 0.25;
    store.save_agent_state("op-1", &state).await.unwrap();

    let metadata = store.get_operation_metadata("op-1").await.unwrap().unwrap();
    assert_eq!(metadata.status, AgentStatus::Running);
    assert_eq!(metadata.total_steps, 3);
    assert_eq!(metadata.total_cost, 0.25);

    store
        .save_step_result("op-1", &step(3, AgentStatus::Done))
        .await
        .unwrap();
    let metadata = store.get_operation_metadata("op-1").await.unwrap().unwrap();
    assert_eq!(metadata.status, AgentStatus::Done);
    assert_eq!(metadata.total_steps, 4);
    assert!(metadata.last_active_at >= metadata.created_at);
}

#[tokio::test]
async fn test_history_keeps_newest_steps_in_order() {
    let store = InMemoryStateStore::new();
    for i in 0..201 {
        store
            .save_step_result("op-1", &step(i, AgentStatus::Running))
            .await
            .unwrap();
    }

    let history = store.get_execution_history("op-1", 500).await.unwrap();
    assert_eq!(history.len(), 200);
    assert_eq!(history.first().unwrap().step_index, 1);
    assert_eq!(history.last().unwrap().step_index, 200);
    assert!(history.windows(2).all(|w| w[0].step_index < w[1].step_index));

    let recent = store.get_execution_history("op-1", 3).await.unwrap();
    let indexes: Vec<_> = recent.iter().map(|s| s.step_index).collect();
    assert_eq!(indexes, vec![198, 199, 200]);
}

#[tokio::test]
async fn test_custom_history_cap() {
    let store = InMemoryStateStore::with_limits(StateStoreLimits {
        history_cap: 2,
        ..StateStoreLimits::in_process()
    });
    for i in 0..5 {
        store
            .save_step_result("op-1", &step(i, AgentStatus::Running))
            .await
            .unwrap();
    }
    let history = store.get_execution_history("op-1", 50).await.unwrap();
    let indexes: Vec<_> = history.iter().map(|s| s.step_index).collect();
    assert_eq!(indexes, vec![3, 4]);
}

#[tokio::test]
async fn test_unknown_operation_reads_empty() {
    let store = InMemoryStateStore::new();
    assert!(store.load_agent_state("nope").await.unwrap().is_none());
    assert!(store.get_operation_metadata("nope").await.unwrap().is_none());
    assert!(store.get_execution_history("nope", 10).await.unwrap().is_empty());
    store.delete_agent_operation("nope").await.unwrap();
}

#[tokio::test]
async fn test_stats_bucket_operations() {
    let store = InMemoryStateStore::new();
    for (id, status) in [
        ("a", AgentStatus::Running),
        ("b", AgentStatus::WaitingForHuman),
        ("c", AgentStatus::Done),
        ("d", AgentStatus::Error),
        ("e", AgentStatus::Interrupted),
    ] {
        let mut state = agent_state(id);
        state.status = status;
        store.save_agent_state(id, &state).await.unwrap();
    }

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.error, 2);

    let mut active = store.get_active_operations().await.unwrap();
    active.sort();
    assert_eq!(active, vec!["a", "b", "c", "d", "e"]);
}

// =============================================================================
// Event bus
// =============================================================================

#[tokio::test]
async fn test_stream_history_newest_first() {
    let bus = InMemoryEventBus::new();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(bus.publish_stream_event("op-1", input(0, n)).await.unwrap());
    }
    bus.publish_stream_event("op-2", input(0, 99)).await.unwrap();

    let history = bus.get_stream_history("op-1", 3).await.unwrap();
    let ns: Vec<_> = history.iter().map(|e| e.data["n"].as_u64().unwrap()).collect();
    assert_eq!(ns, vec![4, 3, 2]);

    let cursors: Vec<u64> = ids.iter().map(|id| id.parse().unwrap()).collect();
    assert!(cursors.windows(2).all(|w| w[0] < w[1]));
    assert!(history.windows(2).all(|w| w[0].cursor() > w[1].cursor()));
    assert!(history.iter().all(|e| e.operation_id == "op-1"));
}

#[tokio::test]
async fn test_stream_trims_to_max_len() {
    let bus = InMemoryEventBus::with_limits(EventBusLimits {
        max_len: 3,
        ..EventBusLimits::default()
    });
    for n in 0..10 {
        bus.publish_stream_event("op-1", input(0, n)).await.unwrap();
    }

    let ns: Vec<_> = bus
        .events("op-1")
        .await
        .iter()
        .map(|e| e.data["n"].as_u64().unwrap())
        .collect();
    assert_eq!(ns, vec![7, 8, 9]);
}

#[tokio::test]
async fn test_tail_subscription_replays_then_follows() {
    let bus = Arc::new(InMemoryEventBus::new());
    let first = bus.publish_stream_event("op-1", input(0, 0)).await.unwrap();
    bus.publish_stream_event("op-1", input(0, 1)).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let tail_bus = bus.clone();
    let handle = tokio::spawn(async move {
        let mut forward = |batch: Vec<steprun_core::StreamEvent>| {
            for event in batch {
                let _ = tx.send(event);
            }
        };
        tail_bus
            .subscribe_stream_events("op-1", &first, &mut forward, cancel_rx)
            .await
    });

    // Only events after the cursor are replayed
    let replayed = rx.recv().await.unwrap();
    assert_eq!(replayed.data["n"], 1);

    bus.publish_stream_event("op-2", input(0, 50)).await.unwrap();
    bus.publish_stream_event("op-1", input(1, 2)).await.unwrap();
    let live = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.data["n"], 2);
    assert_eq!(live.operation_id, "op-1");

    cancel_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_tail_subscription_rejects_bad_cursor() {
    let bus = InMemoryEventBus::new();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut ignore = |_: Vec<steprun_core::StreamEvent>| {};
    let err = bus
        .subscribe_stream_events("op-1", "not-a-cursor", &mut ignore, cancel_rx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not-a-cursor"));
}

#[tokio::test]
async fn test_wait_for_event_sees_later_publish() {
    let bus = InMemoryEventBus::new();
    let publisher = bus.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher
            .publish_stream_event(
                "op-1",
                StreamEventInput::new(StreamEventType::StreamEnd, 0, json!({})),
            )
            .await
            .unwrap();
    });

    let event = bus
        .wait_for_event("op-1", StreamEventType::StreamEnd, Duration::from_secs(1))
        .await;
    assert!(event.is_some());
    assert_eq!(bus.get_active_operations_count().await.unwrap(), 1);
}

// =============================================================================
// Coordinator cleanup
// =============================================================================

#[tokio::test]
async fn test_cleanup_removes_state_and_stream() {
    let store = InMemoryStateStore::with_limits(StateStoreLimits {
        inactivity_threshold: Duration::ZERO,
        ..StateStoreLimits::in_process()
    });
    let bus = InMemoryEventBus::new();
    let coordinator = AgentRuntimeCoordinator::new(Arc::new(store.clone()), Arc::new(bus.clone()));

    coordinator
        .create_agent_operation(&agent_state("op-1"), CreateOperationParams::default())
        .await
        .unwrap();
    assert_eq!(bus.events("op-1").await.len(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let removed = coordinator.cleanup_expired_operations().await.unwrap();

    assert_eq!(removed, vec!["op-1".to_string()]);
    assert!(coordinator.load_agent_state("op-1").await.unwrap().is_none());
    assert!(bus.events("op-1").await.is_empty());
    assert_eq!(store.operation_count().await, 0);
}

#[tokio::test]
async fn test_cleanup_keeps_recent_operations() {
    let store = InMemoryStateStore::new();
    let bus = InMemoryEventBus::new();
    let coordinator = AgentRuntimeCoordinator::new(Arc::new(store), Arc::new(bus));

    coordinator
        .create_agent_operation(&agent_state("op-1"), CreateOperationParams::default())
        .await
        .unwrap();
    assert!(coordinator.cleanup_expired_operations().await.unwrap().is_empty());
    assert!(coordinator.load_agent_state("op-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_removes_state_and_stream() {
    let store = InMemoryStateStore::new();
    let bus = InMemoryEventBus::new();
    let coordinator = AgentRuntimeCoordinator::new(Arc::new(store), Arc::new(bus.clone()));

    coordinator
        .create_agent_operation(&agent_state("op-1"), CreateOperationParams::default())
        .await
        .unwrap();
    coordinator.delete_agent_operation("op-1").await.unwrap();

    assert!(coordinator.load_agent_state("op-1").await.unwrap().is_none());
    assert!(coordinator.get_operation_metadata("op-1").await.unwrap().is_none());
    assert!(coordinator.get_stream_history("op-1", 10).await.unwrap().is_empty());
    coordinator.disconnect().await.unwrap();
}
