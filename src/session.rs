//! Session controller: the single writer over the whole engine state.
//!
//! All I/O happens in spawned tasks that report back through an
//! [`EngineEvent`] channel; the controller applies each event to completion
//! before the next, so no mutation ever observes half-applied state. The
//! binary's input loop and the event channel are the only two entry points.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{Client, ClientError};
use crate::error::EngineError;
use crate::generation::{self, GenerationTaskManager, PollDirective, POLL_INTERVAL};
use crate::models::{ChatRequest, GenerateRequest, MessageRole, StatusResponse};
use crate::render::RenderSink;
use crate::sse::ChatFrame;
use crate::store::{ConversationStore, DEFAULT_TITLE};
use crate::stream::StreamRouter;

/// Everything the spawned I/O tasks can report back
#[derive(Debug)]
pub enum EngineEvent {
    StreamChunk(String),
    StreamDone,
    StreamFailed(ClientError),
    /// The backend committed a generation task id
    GenerationStarted(String),
    GenerationStartFailed(ClientError),
    /// The poll timer fired
    PollDue,
    PollStatus(StatusResponse),
    PollFailed(ClientError),
}

pub struct SessionController<S: RenderSink> {
    store: ConversationStore,
    router: StreamRouter,
    generation: GenerationTaskManager,
    client: Arc<Client>,
    sink: S,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl<S: RenderSink> SessionController<S> {
    pub fn new(
        store: ConversationStore,
        client: Client,
        sink: S,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            router: StreamRouter::new(),
            generation: GenerationTaskManager::new(),
            client: Arc::new(client),
            sink,
            events: tx,
        };
        (controller, rx)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Render the restored conversation and re-attach to any unresolved
    /// generation task its history records.
    pub fn bootstrap(&mut self) {
        let current = self.store.current_id().to_string();
        if let Some(conv) = self.store.get(&current) {
            self.sink.reload_conversation(conv);
        }
        if let Some(task_id) = self.generation.recover(&current, &mut self.store) {
            self.spawn_status_fetch(task_id);
        }
    }

    /// Send a user message on the current conversation and open the reply
    /// stream. Blank input is ignored.
    pub fn send(&mut self, text: &str) -> Result<(), EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if self.router.is_streaming() {
            return Err(EngineError::StreamAlreadyActive);
        }

        let current = self.store.current_id().to_string();
        self.store.append(&current, MessageRole::User, text);
        self.router.detach_surface();
        if let Some(conv) = self.store.get(&current) {
            self.sink.reload_conversation(conv);
        }
        self.sink.set_send_enabled(false);

        self.router.start(&current)?;
        self.spawn_chat_stream(ChatRequest {
            message: text.to_string(),
            chat_id: current,
        });
        Ok(())
    }

    /// Make another conversation current. Switching to the one already
    /// displayed is a no-op.
    pub fn switch_to(&mut self, id: &str) -> Result<(), EngineError> {
        if id == self.store.current_id() {
            return Ok(());
        }
        if !self.store.contains(id) {
            return Err(EngineError::UnknownConversation(id.to_string()));
        }
        self.store.set_current(id);

        // The reload tears down any stream surface; rebuild it only when
        // the incoming conversation owns the in-flight reply
        self.router.detach_surface();
        if let Some(conv) = self.store.get(id) {
            self.sink.reload_conversation(conv);
        }
        if self.router.owns(id) {
            self.router.reattach(&mut self.sink);
        }

        // An owned task resyncs with one immediate fetch; otherwise the
        // conversation's history may hold a task from a previous session
        if let Some(task_id) = self.generation.promote(id) {
            self.spawn_status_fetch(task_id);
        } else if let Some(task_id) = self.generation.recover(id, &mut self.store) {
            self.spawn_status_fetch(task_id);
        }
        Ok(())
    }

    /// Create an empty conversation and switch to it
    pub fn create(&mut self, title: Option<&str>) -> String {
        let id = self.store.create(title.unwrap_or(DEFAULT_TITLE));
        // Cannot fail: the id was just inserted
        let _ = self.switch_to(&id);
        id
    }

    /// Delete a conversation. Refused while it owns the reply stream or
    /// the generation task.
    pub fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        if !self.store.contains(id) {
            return Err(EngineError::UnknownConversation(id.to_string()));
        }
        if self.router.owns(id) || self.generation.owns(id) {
            return Err(EngineError::ConversationBusy);
        }
        self.store.remove(id);

        let current = self.store.current_id().to_string();
        self.router.detach_surface();
        if let Some(conv) = self.store.get(&current) {
            self.sink.reload_conversation(conv);
        }
        if self.router.owns(&current) {
            self.router.reattach(&mut self.sink);
        }
        // The reselected conversation gets the same task treatment as a
        // manual switch
        if let Some(task_id) = self.generation.promote(&current) {
            self.spawn_status_fetch(task_id);
        } else if let Some(task_id) = self.generation.recover(&current, &mut self.store) {
            self.spawn_status_fetch(task_id);
        }
        Ok(())
    }

    /// Start an image generation task on the current conversation
    pub fn generate(&mut self, prompt: &str) -> Result<(), EngineError> {
        let current = self.store.current_id().to_string();
        self.begin_generation(&current, prompt)
    }

    /// Apply one event. Runs to completion before the caller may hand over
    /// the next one.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::StreamChunk(text) => {
                let active = self.store.current_id().to_string();
                self.router.on_chunk(&text, &active, &mut self.sink);
            }
            EngineEvent::StreamDone => {
                if let Some((owner, text)) = self.router.on_done(&mut self.store, &mut self.sink) {
                    // A completed reply may ask for images
                    if let Some(prompt) = generation::extract_prompt(&text) {
                        if let Err(e) = self.begin_generation(&owner, &prompt) {
                            self.sink.notice(&e.user_message());
                        }
                    }
                }
            }
            EngineEvent::StreamFailed(error) => {
                let error = EngineError::Network(error);
                let active = self.store.current_id().to_string();
                self.router
                    .on_error(&error.user_message(), &active, &mut self.store, &mut self.sink);
            }
            EngineEvent::GenerationStarted(task_id) => {
                let active = self.store.current_id().to_string();
                self.generation
                    .commit_start(&task_id, &mut self.store, &mut self.sink, &active);
                self.schedule_poll(POLL_INTERVAL);
            }
            EngineEvent::GenerationStartFailed(error) => {
                let error = EngineError::Network(error);
                warn!(error = %error, "generation start request failed");
                let active = self.store.current_id().to_string();
                self.generation
                    .fail_start(&mut self.store, &mut self.sink, &active);
            }
            EngineEvent::PollDue => {
                let active = self.store.current_id().to_string();
                match self
                    .generation
                    .handle_poll_due(&mut self.store, &mut self.sink, &active)
                {
                    Ok(Some(task_id)) => self.spawn_status_fetch(task_id),
                    Ok(None) => {}
                    Err(e) => self.sink.notice(&e.user_message()),
                }
            }
            EngineEvent::PollStatus(response) => {
                let active = self.store.current_id().to_string();
                let directive = self.generation.apply_status(
                    &response,
                    &mut self.store,
                    &mut self.sink,
                    &active,
                );
                self.apply_poll_directive(directive);
            }
            EngineEvent::PollFailed(error) => {
                let error = EngineError::Network(error);
                let directive = self.generation.on_poll_error(&error.user_message());
                self.apply_poll_directive(directive);
            }
        }
    }

    fn begin_generation(&mut self, owner: &str, prompt: &str) -> Result<(), EngineError> {
        let active = self.store.current_id().to_string();
        self.generation
            .start_preparing(owner, &mut self.store, &mut self.sink, &active)?;
        info!(conversation_id = %owner, "starting generation task");

        self.spawn_generation_start(GenerateRequest {
            prompt: prompt.to_string(),
            chat_id: owner.to_string(),
        });
        Ok(())
    }

    fn apply_poll_directive(&mut self, directive: PollDirective) {
        match directive {
            PollDirective::Reschedule(delay) => self.schedule_poll(delay),
            PollDirective::Stop => self.generation.cancel_timer(),
        }
    }

    fn schedule_poll(&mut self, delay: std::time::Duration) {
        let tx = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineEvent::PollDue);
        });
        self.generation.set_timer(handle.abort_handle());
    }

    fn spawn_status_fetch(&self, task_id: String) {
        let tx = self.events.clone();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let event = match client.generation_status(&task_id).await {
                Ok(response) => EngineEvent::PollStatus(response),
                Err(e) => EngineEvent::PollFailed(e),
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_generation_start(&self, request: GenerateRequest) {
        let tx = self.events.clone();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let event = match client.start_generation(&request).await {
                Ok(response) => EngineEvent::GenerationStarted(response.task_id),
                Err(e) => EngineEvent::GenerationStartFailed(e),
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_chat_stream(&self, request: ChatRequest) {
        let tx = self.events.clone();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let mut frames = match client.chat_stream(&request).await {
                Ok(frames) => frames,
                Err(e) => {
                    let _ = tx.send(EngineEvent::StreamFailed(e));
                    return;
                }
            };
            while let Some(item) = frames.next().await {
                match item {
                    Ok(ChatFrame::Content(text)) => {
                        if tx.send(EngineEvent::StreamChunk(text)).is_err() {
                            return;
                        }
                    }
                    Ok(ChatFrame::Done) => {
                        let _ = tx.send(EngineEvent::StreamDone);
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(EngineEvent::StreamFailed(e));
                        return;
                    }
                }
            }
            // Connection closed without the sentinel: treat as complete
            let _ = tx.send(EngineEvent::StreamDone);
        });
    }
}
