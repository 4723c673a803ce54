use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ChatId, Message};

/// Local, non-authoritative copy of conversation message lists. Used as a
/// display fallback while the live history loads.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct CachedConversation {
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedConversationSummary {
    pub chat_id: ChatId,
    pub message_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid cache database url '{database_url}'"))?
            .create_if_missing(true);
        // every pooled connection to an in-memory url would see its own empty database
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open cache database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_conversation(&self, chat_id: ChatId, messages: &[Message]) -> Result<()> {
        let messages_json =
            serde_json::to_string(messages).context("failed to encode cached messages")?;
        sqlx::query(
            "INSERT INTO conversation_cache (chat_id, messages_json, message_count, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET messages_json = excluded.messages_json,
                 message_count = excluded.message_count, updated_at = excluded.updated_at",
        )
        .bind(chat_id.0)
        .bind(messages_json)
        .bind(messages.len() as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write cache for chat {}", chat_id.0))?;
        Ok(())
    }

    pub async fn load_conversation(&self, chat_id: ChatId) -> Result<Option<CachedConversation>> {
        let row = sqlx::query(
            "SELECT messages_json, updated_at FROM conversation_cache WHERE chat_id = ?",
        )
        .bind(chat_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("messages_json")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        let messages = match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => messages,
            Err(err) => {
                // the cache is only a fallback; an unreadable entry is dropped
                tracing::warn!(chat_id = chat_id.0, "cache: discarding unreadable entry: {err}");
                self.clear_conversation(chat_id).await?;
                return Ok(None);
            }
        };

        Ok(Some(CachedConversation {
            chat_id,
            messages,
            updated_at,
        }))
    }

    pub async fn list_conversations(&self) -> Result<Vec<CachedConversationSummary>> {
        let rows = sqlx::query(
            "SELECT chat_id, message_count, updated_at FROM conversation_cache ORDER BY updated_at DESC, chat_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CachedConversationSummary {
                    chat_id: ChatId(row.try_get("chat_id")?),
                    message_count: row.try_get("message_count")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    pub async fn clear_conversation(&self, chat_id: ChatId) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM conversation_cache WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let affected = sqlx::query("DELETE FROM conversation_cache")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
