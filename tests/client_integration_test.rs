//! Backend client tests against a mock HTTP server.

use futures_util::StreamExt;

use canvasflow::client::{Client, ClientError};
use canvasflow::models::{ChatRequest, GenerateRequest, SlotStatus};
use canvasflow::sse::ChatFrame;

use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(frames: &[&str]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    body
}

async fn collect_frames(client: &Client, request: &ChatRequest) -> Vec<ChatFrame> {
    let mut stream = client.chat_stream(request).await.expect("open stream");
    let mut frames = Vec::new();
    while let Some(item) = stream.next().await {
        frames.push(item.expect("frame"));
    }
    frames
}

#[tokio::test]
async fn test_chat_stream_decodes_frames_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[r#"{"content": "Hel"}"#, r#"{"content": "lo"}"#, "[DONE]"]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let client = Client::with_base_url(server.uri());
    let request = ChatRequest {
        message: "hi".to_string(),
        chat_id: "c1".to_string(),
    };

    let frames = collect_frames(&client, &request).await;
    assert_eq!(
        frames,
        vec![
            ChatFrame::Content("Hel".to_string()),
            ChatFrame::Content("lo".to_string()),
            ChatFrame::Done,
        ]
    );
}

#[tokio::test]
async fn test_chat_stream_skips_malformed_frames() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&["{broken", r#"{"content": "ok"}"#, "[DONE]"]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let client = Client::with_base_url(server.uri());
    let request = ChatRequest {
        message: "hi".to_string(),
        chat_id: "c1".to_string(),
    };

    let frames = collect_frames(&client, &request).await;
    assert_eq!(
        frames,
        vec![ChatFrame::Content("ok".to_string()), ChatFrame::Done]
    );
}

#[tokio::test]
async fn test_chat_stream_surfaces_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&server)
        .await;

    let client = Client::with_base_url(server.uri());
    let request = ChatRequest {
        message: "hi".to_string(),
        chat_id: "c1".to_string(),
    };

    match client.chat_stream(&request).await {
        Err(ClientError::Server { status, message }) => {
            assert_eq!(status, 500);
            assert!(message.contains("exploded"));
        }
        other => panic!("expected server error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_start_generation_posts_prompt_and_returns_task_id() {
    let server = MockServer::start().await;
    let request = GenerateRequest {
        prompt: "a harbor".to_string(),
        chat_id: "c1".to_string(),
    };
    Mock::given(method("POST"))
        .and(path("/api/generate_images"))
        .and(body_json(&request))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"task_id": "t42"}"#, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::with_base_url(server.uri());
    let response = client.start_generation(&request).await.expect("start");
    assert_eq!(response.task_id, "t42");
}

#[tokio::test]
async fn test_generation_status_decodes_slots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/generate_images/t42"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "images": [
                    {"status": "completed", "url": "/static/generated_images/a.jpg", "prompt": "a harbor"},
                    {"status": "generating", "prompt": "a harbor at night"},
                    {"status": "pending"},
                    {"status": "failed"}
                ]
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let client = Client::with_base_url(server.uri());
    let status = client.generation_status("t42").await.expect("status");

    assert_eq!(status.images.len(), 4);
    assert_eq!(status.images[0].status, SlotStatus::Completed);
    assert_eq!(
        status.images[0].url.as_deref(),
        Some("/static/generated_images/a.jpg")
    );
    assert_eq!(status.images[1].status, SlotStatus::Generating);
    assert!(status.images[2].url.is_none());
    assert_eq!(status.images[3].status, SlotStatus::Failed);
}
