use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, ChatClient, ChatEvent, ClientSettings, NoticeKind, PresenceStatus,
};
use shared::domain::{ChatId, Message, MessageId, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat_cli", about = "Terminal front-end for the live chat backend")]
struct Cli {
    /// Settings file; defaults to ./chat_client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    ws_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
    #[arg(long)]
    user_name: Option<String>,
    #[arg(long)]
    user_role: Option<String>,
    /// Skip the local conversation cache.
    #[arg(long)]
    no_cache: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List conversations visible to the current user.
    List,
    /// Open a conversation and stream it; stdin lines are sent as messages.
    Open {
        #[arg(long, conflicts_with_all = ["student_id", "admin_id"])]
        chat_id: Option<i64>,
        #[arg(long, requires = "admin_id")]
        student_id: Option<i64>,
        #[arg(long, requires = "student_id")]
        admin_id: Option<i64>,
    },
}

impl Cli {
    fn apply(&self, settings: &mut ClientSettings) {
        if let Some(url) = &self.server_url {
            settings.server_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            settings.ws_url = Some(url.clone());
        }
        if let Some(token) = &self.token {
            settings.auth_token = Some(token.clone());
        }
        if let Some(id) = self.user_id {
            settings.user_id = id;
        }
        if let Some(name) = &self.user_name {
            settings.user_name = name.clone();
        }
        if let Some(role) = &self.user_role {
            settings.user_role = role.clone();
        }
        if self.no_cache {
            settings.cache_database_url = None;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Retry(MessageId),
    Read,
    Typing(String),
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "quit" | "exit" => Input::Quit,
        "read" => Input::Read,
        "typing" => Input::Typing(rest.to_string()),
        "retry" if !rest.trim().is_empty() => Input::Retry(MessageId::from(rest.trim())),
        _ => Input::Unknown(name.to_string()),
    }
}

fn render_message(message: &Message) -> String {
    let edited = if message.is_edited { " (edited)" } else { "" };
    format!(
        "[{}] #{} {}: {}{} [{:?}]",
        message.timestamp.format("%H:%M:%S"),
        message.id,
        message.sender_name,
        message.content,
        edited,
        message.status
    )
}

fn render_event(event: &ChatEvent) -> Option<String> {
    Some(match event {
        ChatEvent::HistoryLoaded { chat_id, messages } => {
            let mut out = format!("-- chat {chat_id}: {} messages --", messages.len());
            for message in messages {
                out.push('\n');
                out.push_str(&render_message(message));
            }
            out
        }
        ChatEvent::MessageAdded(message) => render_message(message),
        ChatEvent::MessageReplaced {
            previous_id,
            message,
        } => format!("{previous_id} -> {}", render_message(message)),
        ChatEvent::MessageUpdated(message) => format!("updated {}", render_message(message)),
        ChatEvent::MessageRemoved(id) => format!("removed #{id}"),
        ChatEvent::SendFailed { .. } => return None,
        ChatEvent::TypingChanged(Some(user)) => format!("{} is typing…", user.name),
        ChatEvent::TypingChanged(None) => return None,
        ChatEvent::PresenceChanged(view) => {
            let status = match view.status {
                PresenceStatus::Online => "online",
                PresenceStatus::Offline => "offline",
                PresenceStatus::Reconnecting => "reconnecting",
            };
            match &view.warning {
                Some(warning) => format!("** {status}: {warning}"),
                None => format!("** {status}"),
            }
        }
        ChatEvent::Notice(notice) => match &notice.kind {
            NoticeKind::InlineRetry { message_id } => {
                format!("!! {} (type /retry {message_id})", notice.text)
            }
            _ => format!("!! {}", notice.text),
        },
    })
}

async fn print_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat_cli: event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn list(client: &ChatClient) -> Result<()> {
    let chats = client.list_chats().await?;
    if chats.is_empty() {
        println!("no conversations");
    }
    for chat in chats {
        let people = chat
            .participants
            .iter()
            .map(|p| format!("{} ({})", p.name, p.role))
            .collect::<Vec<_>>()
            .join(", ");
        let unread = chat.unread_count.unwrap_or(0);
        println!("{}\t{}\t{unread} unread\t{people}", chat.id, chat.title);
    }
    Ok(())
}

async fn open(
    client: Arc<ChatClient>,
    chat_id: Option<i64>,
    student_id: Option<i64>,
    admin_id: Option<i64>,
) -> Result<()> {
    let printer = tokio::spawn(print_events(client.subscribe_events()));

    match (chat_id, student_id, admin_id) {
        (Some(id), _, _) => client.open_chat(ChatId(id)).await?,
        (None, Some(student), Some(admin)) => {
            let chat = client
                .open_conversation_with(UserId(student), UserId(admin))
                .await?;
            println!("opened chat {}", chat.id);
        }
        _ => anyhow::bail!("pass --chat-id or both --student-id and --admin-id"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::Unknown(name) => {
                eprintln!("unknown command /{name}");
                continue;
            }
            Input::Send(text) => client.send_message(&text, None).await.map(|_| ()),
            Input::Retry(id) => client.retry_send(&id).await,
            Input::Read => client.mark_read().await,
            Input::Typing(text) => client.input_changed(&text).await,
        };
        if let Err(err) = result {
            eprintln!("error: {err}");
        }
    }

    client.close().await;
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    cli.apply(&mut settings);
    let client = ChatClient::from_settings(settings).await?;

    match cli.command {
        Command::List => list(&client).await,
        Command::Open {
            chat_id,
            student_id,
            admin_id,
        } => open(client, chat_id, student_id, admin_id).await,
    }
}
