use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    Attachment, ChatId, ChatSummary, Message, MessageId, MessageKind, MessageStatus, Participant,
    Role, UserId,
};

/// Frames the client writes to the live chat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    UserJoin {
        user_id: UserId,
        user_role: Role,
    },
    Ping,
    TypingStart {
        user_id: UserId,
        user_name: String,
        user_role: Role,
    },
    TypingStop {
        user_id: UserId,
        user_name: String,
        user_role: Role,
    },
    SendMessage {
        message: String,
        reply_to: Option<MessageId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Frames pushed by the gateway. Unrecognised `type` values decode as `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong,
    MessageSent {
        message: WireMessage,
    },
    MessageEdited {
        message: WireMessage,
    },
    TypingStatus {
        user: Participant,
        is_typing: bool,
    },
    UserStatus {
        action: PresenceAction,
        #[serde(default)]
        user: Option<Participant>,
    },
    #[serde(other)]
    Unknown,
}

/// Message record as the backend serialises it. Only `id` is mandatory;
/// everything else is defaulted during normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: MessageId,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_role: Option<Role>,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "type")]
    pub message_type: Option<MessageKind>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

pub const UNKNOWN_SENDER_NAME: &str = "Unknown";

/// Keeps string timestamps and discards any other JSON shape, so a record
/// with an epoch number or an object still decodes and is stamped locally.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(raw) => Some(raw),
        _ => None,
    })
}

/// Parses the timestamp formats the backend is known to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

impl WireMessage {
    /// True when the record carries a timestamp that `parse_timestamp` accepts.
    pub fn has_valid_timestamp(&self) -> bool {
        self.timestamp.as_deref().and_then(parse_timestamp).is_some()
    }

    /// Converts into the canonical model; a missing or malformed timestamp
    /// becomes `now`.
    pub fn into_message(self, status: MessageStatus, now: DateTime<Utc>) -> Message {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);
        Message {
            id: self.id,
            sender_id: self.sender_id.unwrap_or(UserId::UNKNOWN),
            sender_name: self
                .sender_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SENDER_NAME.to_string()),
            sender_role: self.sender_role.unwrap_or_default(),
            content: self.content,
            kind: self.message_type.unwrap_or_default(),
            attachments: self.attachments,
            timestamp,
            status,
            is_edited: self.is_edited,
            reply_to: self.reply_to,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub chat: ChatSummary,
}

/// `GET /live-chats/` answers either with a bare list or a paginated envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatListResponse {
    List(Vec<ChatSummary>),
    Paged { results: Vec<ChatSummary> },
}

impl ChatListResponse {
    pub fn into_chats(self) -> Vec<ChatSummary> {
        match self {
            ChatListResponse::List(chats) => chats,
            ChatListResponse::Paged { results } => results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub results: Vec<WireMessage>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to: Option<MessageId>,
}

pub fn chat_messages_path(chat_id: ChatId) -> String {
    format!("/live-chats/{}/messages/", chat_id.0)
}

pub fn chat_send_path(chat_id: ChatId) -> String {
    format!("/live-chats/{}/send-message/", chat_id.0)
}

pub fn chat_mark_read_path(chat_id: ChatId) -> String {
    format!("/live-chats/{}/mark-read/", chat_id.0)
}

pub fn chat_socket_path(chat_id: ChatId) -> String {
    format!("/ws/live-chat/{}/", chat_id.0)
}
