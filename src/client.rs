//! HTTP client for the CanvasFlow backend.
//!
//! Covers the three endpoints the engine talks to: the streaming chat
//! endpoint and the image-generation start/status pair.

use std::pin::Pin;

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use thiserror::Error;

use crate::models::{ChatRequest, GenerateRequest, GenerateResponse, StatusResponse};
use crate::sse::{ChatFrame, SseParser};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Error type for backend client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// A pinned stream of decoded chat frames
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatFrame, ClientError>> + Send>>;

/// Client for the CanvasFlow backend API
pub struct Client {
    pub base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Open the reply stream for a chat message.
    ///
    /// Sends a POST to `/api/chat` and decodes the SSE body into
    /// [`ChatFrame`]s. Malformed frames are skipped inside the parser;
    /// transport errors surface as stream items.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, ClientError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Server { status, message });
        }

        let bytes_stream = response.bytes_stream();

        // Split the byte stream into lines and feed them through the parser
        let frame_stream = stream::unfold(
            (bytes_stream, SseParser::new(), String::new()),
            |(mut bytes_stream, mut parser, mut buffer)| async move {
                loop {
                    if let Some(newline_pos) = buffer.find('\n') {
                        let line = buffer[..newline_pos].to_string();
                        buffer = buffer[newline_pos + 1..].to_string();

                        if let Some(frame) = parser.feed_line(&line) {
                            return Some((Ok(frame), (bytes_stream, parser, buffer)));
                        }
                        continue;
                    }

                    match bytes_stream.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(ClientError::Http(e)),
                                (bytes_stream, parser, buffer),
                            ));
                        }
                        None => {
                            // Flush a trailing unterminated line
                            if !buffer.is_empty() {
                                let line = std::mem::take(&mut buffer);
                                if let Some(frame) = parser.feed_line(&line) {
                                    return Some((Ok(frame), (bytes_stream, parser, buffer)));
                                }
                            }
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(frame_stream))
    }

    /// Kick off an image-generation job. Returns the committed task id.
    pub async fn start_generation(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, ClientError> {
        let url = format!("{}/api/generate_images", self.base_url);
        let response = self.http.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Server { status, message });
        }

        Ok(response.json().await?)
    }

    /// Fetch the current status of a generation task
    pub async fn generation_status(&self, task_id: &str) -> Result<StatusResponse, ClientError> {
        let url = format!("{}/api/generate_images/{}", self.base_url, task_id);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Server { status, message });
        }

        Ok(response.json().await?)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_default_base_url() {
        let client = Client::new();
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_with_base_url() {
        let client = Client::with_base_url("http://localhost:8080".to_string());
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_chat_stream_with_unreachable_server() {
        let client = Client::with_base_url("http://127.0.0.1:1".to_string());
        let request = ChatRequest {
            message: "hi".to_string(),
            chat_id: "c1".to_string(),
        };
        assert!(client.chat_stream(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_generation_status_with_unreachable_server() {
        let client = Client::with_base_url("http://127.0.0.1:1".to_string());
        assert!(client.generation_status("abc123").await.is_err());
    }
}
