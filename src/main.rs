use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use chat_stream_sync::api::ApiClient;
use chat_stream_sync::message_log::{LogChange, MessageLog};
use chat_stream_sync::models::{ConversationId, ConversationRef, Sender};
use chat_stream_sync::session::SessionOutcome;
use chat_stream_sync::store::{HttpPersistence, InMemoryPersistence, PersistenceService};
use chat_stream_sync::transport::HttpTransport;
use chat_stream_sync::{ChatService, ClientConfig};

const HELP: &str = "Commands: /new, /list, /open <id>, /delete <id>, /quit. Anything else is sent.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_stream_sync=info".into()),
        )
        .init();

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let config = ClientConfig::from_env()?;
    let api = ApiClient::new(&config)?;
    let transport = Arc::new(HttpTransport::new(api.clone(), config.client_side_save));
    let store: Arc<dyn PersistenceService> = if config.offline {
        info!("Offline mode: conversations are kept in memory");
        Arc::new(InMemoryPersistence::new())
    } else {
        Arc::new(HttpPersistence::new(api))
    };
    let chat = ChatService::new(&config, transport, store);

    info!("Talking to {}", config.api_base);
    println!("{HELP}");

    tokio::spawn(render(chat.log()));

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut current: Option<ConversationRef> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => continue,
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/new" => {
                chat.new_conversation();
                current = None;
                println!("-- new conversation --");
            }
            "/list" => match chat.list_conversations().await {
                Ok(conversations) => {
                    for c in conversations {
                        println!("{}  {}  {}", c.id, c.created_at.format("%Y-%m-%d %H:%M"), c.title);
                    }
                }
                Err(e) => error!("Failed to list conversations: {e}"),
            },
            "/open" => {
                let id = ConversationId::new(arg.trim());
                match chat.select_conversation(&id).await {
                    Ok(()) => current = Some(ConversationRef::Durable(id)),
                    Err(e) => error!("Failed to open conversation: {e}"),
                }
            }
            "/delete" => {
                let id = ConversationId::new(arg.trim());
                match chat.delete_conversation(&id).await {
                    Ok(()) => {
                        if current.as_ref().and_then(ConversationRef::as_durable) == Some(&id) {
                            chat.new_conversation();
                            current = None;
                        }
                        println!("-- deleted {id} --");
                    }
                    Err(e) => error!("Failed to delete conversation: {e}"),
                }
            }
            _ => match chat.send(current.clone(), line).await {
                Ok(handle) => {
                    current = Some(ConversationRef::Durable(handle.conversation_id().clone()));
                    if handle.wait().await == SessionOutcome::TokenLimited {
                        println!("\n-- type /new to continue in a new conversation --");
                    }
                    println!();
                }
                Err(e) => println!("!! {e}"),
            },
        }
    }

    Ok(())
}

/// Prints bot text as the log grows.
async fn render(log: Arc<MessageLog>) {
    let mut changes = log.subscribe();
    let mut printed: HashMap<String, usize> = HashMap::new();

    while let Ok(change) = changes.recv().await {
        let id = match change {
            LogChange::Appended { id } | LogChange::Updated { id } => id,
            LogChange::Replaced { id } => {
                if let Some(m) = log.get(&id) {
                    println!("\n{}", m.text);
                    printed.insert(id, m.text.len());
                }
                continue;
            }
            LogChange::Reset => {
                printed.clear();
                for m in log.snapshot() {
                    println!("[{}] {}", m.sender, m.text);
                    printed.insert(m.id, m.text.len());
                }
                continue;
            }
            LogChange::ConversationsChanged => continue,
        };

        let Some(message) = log.get(&id) else { continue };
        if message.sender != Sender::Bot {
            continue;
        }
        let seen = printed.entry(id).or_insert_with(|| {
            print!("[bot] ");
            0
        });
        if let Some(fresh) = message.text.get(*seen..) {
            print!("{fresh}");
            *seen = message.text.len();
        }
        let _ = std::io::stdout().flush();
    }
}
