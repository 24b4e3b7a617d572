use canvasflow::client::{Client, DEFAULT_BASE_URL};
use canvasflow::models::{Conversation, GenerationState, MessageRole};
use canvasflow::render::RenderSink;
use canvasflow::session::SessionController;
use canvasflow::storage::FileStorage;
use canvasflow::store::ConversationStore;

use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Plain line-oriented sink for running the engine in a terminal.
///
/// Stream text is printed as it arrives; richer affordances (retry, image
/// selection) degrade to printed hints.
struct ConsoleSink;

impl RenderSink for ConsoleSink {
    fn reload_conversation(&mut self, conversation: &Conversation) {
        println!("\n=== {} ({}) ===", conversation.title, conversation.id);
        for message in &conversation.messages {
            let who = match message.role {
                MessageRole::User => "you",
                MessageRole::Assistant => "assistant",
            };
            println!("[{}] {}", who, message.content);
        }
    }

    fn begin_assistant_reply(&mut self, _conversation_id: &str, seed: &str) {
        print!("[assistant] {}", seed);
        flush();
    }

    fn append_reply_text(&mut self, text: &str) {
        print!("{}", text);
        flush();
    }

    fn show_error(&mut self, message: &str) {
        println!("\n! {}", message);
    }

    fn set_send_enabled(&mut self, enabled: bool) {
        if enabled {
            println!();
        }
    }

    fn update_generation(&mut self, status_line: &str, state: &GenerationState) {
        println!(
            "[images] {} ({} of 4 done)",
            status_line,
            state.completed_count() + state.failed_count()
        );
    }

    fn offer_retry(&mut self, message: &str) {
        println!("[images] {} Type /generate <prompt> to retry.", message);
    }

    fn offer_slot_actions(&mut self, completed_slots: &[usize]) {
        println!("[images] ready: slots {:?}", completed_slots);
    }

    fn notice(&mut self, message: &str) {
        println!("* {}", message);
    }
}

fn flush() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("commands: /new [title], /list, /switch <id>, /delete <id>, /generate <prompt>, /quit");
    println!("anything else is sent as a chat message");
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let base_url =
        std::env::var("CANVASFLOW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let store = ConversationStore::load(Box::new(FileStorage::new()?));
    let client = Client::with_base_url(base_url.clone());

    println!("canvasflow {} (backend {})", VERSION, base_url);
    print_help();

    let (mut controller, mut events) = SessionController::new(store, client, ConsoleSink);
    controller.bootstrap();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => controller.handle_event(event),
                    None => break,
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !handle_line(&mut controller, &line) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Returns false when the user asked to quit
fn handle_line(controller: &mut SessionController<ConsoleSink>, line: &str) -> bool {
    let line = line.trim();
    let outcome = if line == "/new" || line.starts_with("/new ") {
        let title = line.trim_start_matches("/new").trim();
        let id = controller.create(if title.is_empty() { None } else { Some(title) });
        println!("created {}", id);
        Ok(())
    } else if line == "/list" {
        for conv in controller.store().list() {
            let marker = if conv.id == controller.store().current_id() {
                "*"
            } else {
                " "
            };
            println!("{} {}  {}", marker, conv.id, conv.title);
        }
        Ok(())
    } else if let Some(id) = line.strip_prefix("/switch ") {
        controller.switch_to(id.trim())
    } else if let Some(id) = line.strip_prefix("/delete ") {
        controller.delete(id.trim())
    } else if let Some(prompt) = line.strip_prefix("/generate ") {
        controller.generate(prompt.trim())
    } else if line == "/quit" {
        return false;
    } else if line == "/help" {
        print_help();
        Ok(())
    } else {
        controller.send(line)
    };

    if let Err(e) = outcome {
        println!("! {}", e.user_message());
    }
    true
}
