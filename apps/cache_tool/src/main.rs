use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::ChatId;
use storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "cache_tool", about = "Inspect or clear the local conversation cache")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/chat_cache.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    Show {
        #[arg(long)]
        chat_id: i64,
    },
    Clear {
        #[arg(long, required_unless_present = "all")]
        chat_id: Option<i64>,
        #[arg(long, conflicts_with = "chat_id")]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    storage.health_check().await?;

    match cli.command {
        Command::List => {
            let cached = storage.list_conversations().await?;
            if cached.is_empty() {
                println!("cache is empty");
            }
            for entry in cached {
                println!(
                    "chat_id={} messages={} updated_at={}",
                    entry.chat_id,
                    entry.message_count,
                    entry.updated_at.to_rfc3339()
                );
            }
        }
        Command::Show { chat_id } => {
            let Some(cached) = storage.load_conversation(ChatId(chat_id)).await? else {
                bail!("no cached conversation for chat_id={chat_id}");
            };
            println!(
                "chat_id={} updated_at={}",
                cached.chat_id,
                cached.updated_at.to_rfc3339()
            );
            for message in cached.messages {
                println!(
                    "{}\t{}\t{}\t{:?}\t{}",
                    message.timestamp.to_rfc3339(),
                    message.id,
                    message.sender_name,
                    message.status,
                    message.content
                );
            }
        }
        Command::Clear { chat_id, all } => {
            if all {
                let removed = storage.clear_all().await?;
                println!("removed {removed} cached conversations");
            } else if let Some(chat_id) = chat_id {
                let removed = storage.clear_conversation(ChatId(chat_id)).await?;
                println!(
                    "{} chat_id={chat_id}",
                    if removed { "cleared" } else { "nothing cached for" }
                );
            }
        }
    }

    Ok(())
}
