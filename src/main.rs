//! Terminal front-end for AIChat.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use aichat::agent_core::database::DEFAULT_CHAT_TITLE;
use aichat::agent_core::{ContentType, Message, TurnOptions};
use aichat::agents::Model;
use aichat::config::{self, load_config};
use aichat::mcp_client::ProtocolHandler;
use aichat::App;

/// Preview length for tool results in the chat view.
const TOOL_PREVIEW_CHARS: usize = 200;

const CHAT_TITLE_CHARS: usize = 40;

#[derive(Parser)]
#[command(name = "aichat", version, about = "Chat with LLMs, with MCP tool use")]
struct Cli {
    /// Path to an aichat.yaml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Model id, e.g. gpt-4o-mini
        #[arg(long)]
        model: Option<String>,
        /// Continue an existing chat
        #[arg(long)]
        chat: Option<String>,
        /// Wait for complete responses instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
    /// List chats
    Chats,
    /// Print a chat's messages
    History { chat_id: String },
    /// List selectable models
    Models,
    /// List tools advertised by the configured tool servers
    Tools,
    /// Read a resource from a tool server
    Resource { uri: String },
    /// Render a prompt template: `prompt NAME key=value ...`
    Prompt { name: String, args: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat {
        model: None,
        chat: None,
        no_stream: false,
    });

    if let Command::Models = command {
        for model in Model::ALL {
            println!("{:<28} {}", model.id(), model.provider());
        }
        return Ok(());
    }

    let data_dir = aichat::data_dir();
    if let Err(e) = aichat::init_tracing(&data_dir) {
        eprintln!("warning: logging disabled: {e}");
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let cwd = std::env::current_dir().context("cannot read working directory")?;
            config::load_or_default(&cwd, &data_dir)?
        }
    };

    let app = App::start(config, &data_dir).await?;
    for (server, e) in &app.startup_failures {
        eprintln!("warning: tool server '{server}' failed to start: {e}");
    }

    let result = run(&app, command).await;
    app.shutdown().await;
    result
}

async fn run(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Chat {
            model,
            chat,
            no_stream,
        } => {
            let model = match model {
                Some(id) => id.parse::<Model>()?,
                None => app.config.default_model,
            };
            let stream = app.config.prefer_streaming && !no_stream;
            chat_repl(app, model, chat, stream).await
        }
        Command::Chats => {
            for chat in app.db.list_chats()? {
                println!(
                    "{}  {}  {}",
                    chat.id,
                    chat.created_at.format("%Y-%m-%d %H:%M"),
                    chat.title
                );
            }
            Ok(())
        }
        Command::History { chat_id } => {
            for msg in app.conversations.history(&app.db.get_chat(&chat_id)?.id)? {
                print_message(&msg);
            }
            Ok(())
        }
        Command::Models => Ok(()),
        Command::Tools => {
            let tools = app.mcp.tools();
            if tools.is_empty() {
                println!("no tools available");
            }
            for tool in tools {
                println!("{:<32} {}", tool.name, tool.description);
            }
            Ok(())
        }
        Command::Resource { uri } => {
            for content in app.mcp.read_resource(&uri).await? {
                match (content.text, content.blob) {
                    (Some(text), _) => println!("{text}"),
                    (None, Some(blob)) => println!(
                        "[{} bytes of {}]",
                        blob.len(),
                        content.mime_type.as_deref().unwrap_or("binary data")
                    ),
                    (None, None) => {}
                }
            }
            Ok(())
        }
        Command::Prompt { name, args } => {
            let mut arguments = HashMap::new();
            for arg in args {
                let Some((key, value)) = arg.split_once('=') else {
                    bail!("prompt arguments must look like key=value, got '{arg}'");
                };
                arguments.insert(key.to_string(), value.to_string());
            }
            println!("{}", app.mcp.get_prompt(&name, arguments).await?);
            Ok(())
        }
    }
}

async fn chat_repl(
    app: &App,
    model: Model,
    chat_id: Option<String>,
    stream: bool,
) -> anyhow::Result<()> {
    let (chat_id, mut untitled) = match chat_id {
        Some(id) => {
            for msg in app.conversations.history(&app.db.get_chat(&id)?.id)? {
                print_message(&msg);
            }
            (id, false)
        }
        None => (app.db.create_chat(DEFAULT_CHAT_TITLE)?.id, true),
    };
    println!("chat {chat_id} with {model}. Ctrl-C cancels a response, /quit exits.");

    let prompt = format!("{}> ", app.conversations.user_role().name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{prompt}");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "/quit" | "/exit") {
            break;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let options = TurnOptions {
            cancel: CancellationToken::new(),
            fragments: stream.then_some(tx),
            prefer_streaming: Some(stream),
        };

        let printer = tokio::spawn(async move {
            let mut printed = String::new();
            while let Some(piece) = rx.recv().await {
                print!("{piece}");
                let _ = std::io::stdout().flush();
                printed.push_str(&piece);
            }
            printed
        });
        let cancel = options.cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let outcome = app.conversations.send(&chat_id, text, model, &options).await;
        watcher.abort();
        drop(options);
        let streamed = printer.await.unwrap_or_default();
        if !streamed.is_empty() {
            println!();
        }

        let messages = outcome?.messages;
        let last = messages.len().saturating_sub(1);
        for (i, msg) in messages.iter().enumerate() {
            if i == last && already_streamed(msg, &streamed) {
                continue;
            }
            print_message(msg);
        }

        if untitled {
            let title: String = text.chars().take(CHAT_TITLE_CHARS).collect();
            app.db.rename_chat(&chat_id, &title)?;
            untitled = false;
        }
    }
    Ok(())
}

/// Whether the final reply is exactly the text the last request streamed.
fn already_streamed(msg: &Message, streamed: &str) -> bool {
    match (&msg.content_type, msg.content.as_deref()) {
        (ContentType::Text, Some(content)) => !content.is_empty() && streamed.ends_with(content),
        _ => false,
    }
}

fn print_message(msg: &Message) {
    let content = msg.content.as_deref().unwrap_or_default();
    match msg.content_type {
        ContentType::ToolResult => {
            let name = msg.tool_call.as_ref().map_or("tool", |c| c.name.as_str());
            let preview: String = content.chars().take(TOOL_PREVIEW_CHARS).collect();
            let ellipsis = if content.chars().count() > TOOL_PREVIEW_CHARS { "…" } else { "" };
            println!("[{name}] {preview}{ellipsis}");
        }
        ContentType::Error => println!("! {content}"),
        _ => println!("{}: {content}", msg.display_role.name),
    }
}
