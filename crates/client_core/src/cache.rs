use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{ChatId, Message};
use storage::Storage;

/// Local copy of a conversation, shown while history loads.
#[async_trait]
pub trait ConversationCache: Send + Sync {
    async fn load(&self, chat_id: ChatId) -> Result<Option<Vec<Message>>>;
    async fn save(&self, chat_id: ChatId, messages: &[Message]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ConversationCache for NoopCache {
    async fn load(&self, _chat_id: ChatId) -> Result<Option<Vec<Message>>> {
        Ok(None)
    }

    async fn save(&self, _chat_id: ChatId, _messages: &[Message]) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ConversationCache for Storage {
    async fn load(&self, chat_id: ChatId) -> Result<Option<Vec<Message>>> {
        Ok(self
            .load_conversation(chat_id)
            .await?
            .map(|cached| cached.messages))
    }

    async fn save(&self, chat_id: ChatId, messages: &[Message]) -> Result<()> {
        self.save_conversation(chat_id, messages).await
    }
}
