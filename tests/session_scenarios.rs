//! End-to-end scenarios: controller + event loop against a mock backend.

use std::time::Duration;

use tokio::sync::mpsc;

use canvasflow::client::Client;
use canvasflow::generation::grammar;
use canvasflow::models::{GenerationState, Message, MessageRole, SlotStatus};
use canvasflow::render::RecordingSink;
use canvasflow::session::{EngineEvent, SessionController};
use canvasflow::storage::{FileStorage, MemoryStorage};
use canvasflow::store::ConversationStore;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn next_event(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for engine event")
        .expect("event channel closed")
}

fn controller_with(
    store: ConversationStore,
    server: &MockServer,
) -> (
    SessionController<RecordingSink>,
    mpsc::UnboundedReceiver<EngineEvent>,
) {
    let client = Client::with_base_url(server.uri());
    SessionController::new(store, client, RecordingSink::new())
}

async fn mount_chat_reply(server: &MockServer, frames: &[&str]) {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

async fn mount_generation_backend(server: &MockServer, task_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/generate_images"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(r#"{{"task_id": "{task_id}"}}"#),
            "application/json",
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/generate_images/{task_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "images": [
                    {"status": "completed", "url": "/static/generated_images/0.jpg", "prompt": "p0"},
                    {"status": "completed", "url": "/static/generated_images/1.jpg", "prompt": "p1"},
                    {"status": "completed", "url": "/static/generated_images/2.jpg", "prompt": "p2"},
                    {"status": "completed", "url": "/static/generated_images/3.jpg", "prompt": "p3"}
                ]
            }"#,
            "application/json",
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_chat_reply_streams_and_commits() {
    let server = MockServer::start().await;
    mount_chat_reply(
        &server,
        &[r#"{"content": "Hel"}"#, r#"{"content": "lo"}"#, "[DONE]"],
    )
    .await;

    let store = ConversationStore::load(Box::new(MemoryStorage::new()));
    let (mut ctrl, mut rx) = controller_with(store, &server);
    ctrl.send("hi there").unwrap();

    loop {
        let event = next_event(&mut rx).await;
        let done = matches!(event, EngineEvent::StreamDone);
        ctrl.handle_event(event);
        if done {
            break;
        }
    }

    let conv = ctrl.store().get(ctrl.store().current_id()).unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[0].content, "hi there");
    assert_eq!(conv.messages[1].content, "Hello");
    assert_eq!(conv.messages[1].role, MessageRole::Assistant);
    // Send unlocked after the terminal transition
    assert!(ctrl.send("next").is_ok());
}

#[tokio::test]
async fn test_generation_lifecycle_start_to_completion() {
    let server = MockServer::start().await;
    mount_generation_backend(&server, "t1").await;

    let store = ConversationStore::load(Box::new(MemoryStorage::new()));
    let (mut ctrl, mut rx) = controller_with(store, &server);
    ctrl.generate("a harbor at dusk").unwrap();

    let event = next_event(&mut rx).await;
    assert!(matches!(&event, EngineEvent::GenerationStarted(id) if id == "t1"));
    ctrl.handle_event(event);

    // Force the first poll instead of waiting out the timer
    ctrl.handle_event(EngineEvent::PollDue);
    let event = next_event(&mut rx).await;
    assert!(matches!(event, EngineEvent::PollStatus(_)));
    ctrl.handle_event(event);

    let conv = ctrl.store().get(ctrl.store().current_id()).unwrap();
    let last = conv.messages.last().unwrap();
    assert!(last.content.contains("All four"));
    assert!(last.content.contains("/static/generated_images/0.jpg"));
    let state = last.generation.as_ref().unwrap();
    assert!(state.is_terminal());
    assert_eq!(state.completed_count(), 4);
    // The single task slot is free again
    assert!(ctrl.generate("another one").is_ok());
}

#[tokio::test]
async fn test_reply_directive_starts_generation_end_to_end() {
    let server = MockServer::start().await;
    mount_chat_reply(
        &server,
        &[r#"{"content": "A lighthouse DRAWING_FINAL:"}"#, "[DONE]"],
    )
    .await;
    mount_generation_backend(&server, "t2").await;

    let store = ConversationStore::load(Box::new(MemoryStorage::new()));
    let (mut ctrl, mut rx) = controller_with(store, &server);
    ctrl.send("draw me a lighthouse").unwrap();

    loop {
        let event = next_event(&mut rx).await;
        let started = matches!(&event, EngineEvent::GenerationStarted(_));
        ctrl.handle_event(event);
        if started {
            break;
        }
    }

    let conv = ctrl.store().get(ctrl.store().current_id()).unwrap();
    // user message, committed reply, then the placeholder
    assert_eq!(conv.messages.len(), 3);
    assert!(conv.messages[1].content.contains("DRAWING_FINAL:"));
    let placeholder = &conv.messages[2];
    assert!(placeholder.content.contains("task_id: t2"));
    assert!(placeholder.generation.is_some());

    ctrl.handle_event(EngineEvent::PollDue);
    let event = next_event(&mut rx).await;
    ctrl.handle_event(event);

    let conv = ctrl.store().get(ctrl.store().current_id()).unwrap();
    assert!(conv.messages[2].generation.as_ref().unwrap().is_terminal());
}

#[tokio::test]
async fn test_unresolved_task_recovers_across_restart() {
    let server = MockServer::start().await;
    mount_generation_backend(&server, "t9").await;

    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot_path = dir.path().join("chats.json");

    // First run: a task is in flight when the process stops
    let owner = {
        let mut store =
            ConversationStore::load(Box::new(FileStorage::at(snapshot_path.clone())));
        let owner = store.current_id().to_string();
        let mut state = GenerationState::preparing();
        state.task_id = Some("t9".to_string());
        for slot in &mut state.slots {
            slot.status = SlotStatus::Generating;
        }
        let mut message = Message::new(
            MessageRole::Assistant,
            grammar::encode("in progress", &state),
        );
        message.generation = Some(state);
        store.append_message(&owner, message);
        owner
    };

    // Second run: bootstrap re-attaches and one fetch resolves the task
    let store = ConversationStore::load(Box::new(FileStorage::at(snapshot_path)));
    assert_eq!(store.current_id(), owner);
    let (mut ctrl, mut rx) = controller_with(store, &server);
    ctrl.bootstrap();

    let event = next_event(&mut rx).await;
    assert!(matches!(event, EngineEvent::PollStatus(_)));
    ctrl.handle_event(event);

    let conv = ctrl.store().get(&owner).unwrap();
    let last = conv.messages.last().unwrap();
    assert!(last.generation.as_ref().unwrap().is_terminal());
    assert!(last.content.contains("All four"));
}

#[tokio::test]
async fn test_poll_failure_keeps_task_alive_for_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate_images"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"task_id": "t3"}"#, "application/json"),
        )
        .mount(&server)
        .await;
    // Status endpoint is down
    Mock::given(method("GET"))
        .and(path("/api/generate_images/t3"))
        .respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let store = ConversationStore::load(Box::new(MemoryStorage::new()));
    let (mut ctrl, mut rx) = controller_with(store, &server);
    ctrl.generate("a harbor").unwrap();

    let event = next_event(&mut rx).await;
    ctrl.handle_event(event);
    ctrl.handle_event(EngineEvent::PollDue);

    let event = next_event(&mut rx).await;
    assert!(matches!(event, EngineEvent::PollFailed(_)));
    ctrl.handle_event(event);

    // Still owned: a second start is refused, the placeholder is unresolved
    assert!(ctrl.generate("another").is_err());
    let conv = ctrl.store().get(ctrl.store().current_id()).unwrap();
    let state = conv.messages.last().unwrap().generation.as_ref().unwrap();
    assert!(state.is_unresolved());
}

#[tokio::test]
async fn test_switch_during_background_completion() {
    let server = MockServer::start().await;
    mount_generation_backend(&server, "t4").await;

    let store = ConversationStore::load(Box::new(MemoryStorage::new()));
    let (mut ctrl, mut rx) = controller_with(store, &server);
    let owner = ctrl.store().current_id().to_string();
    ctrl.generate("a harbor").unwrap();

    let event = next_event(&mut rx).await;
    ctrl.handle_event(event);

    // User switches away; the poll lands while the owner is hidden
    let other = ctrl.create(Some("Other"));
    assert_eq!(ctrl.store().current_id(), other);
    ctrl.handle_event(EngineEvent::PollDue);
    let event = next_event(&mut rx).await;
    ctrl.handle_event(event);

    // Completion was persisted on the hidden conversation
    let conv = ctrl.store().get(&owner).unwrap();
    assert!(conv.messages.last().unwrap().content.contains("All four"));

    // Switching back shows the finished result via a plain reload
    ctrl.switch_to(&owner).unwrap();
    assert_eq!(ctrl.store().current_id(), owner);
}
