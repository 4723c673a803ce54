//! Client error taxonomy and the user-facing notices derived from it.

use shared::{domain::MessageId, error::ApiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication rejected by server ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network request failed: {0}")]
    Network(String),
    #[error("malformed server payload: {0}")]
    Payload(String),
    #[error("chat transport failure: {0}")]
    Transport(String),
    #[error("chat connection is not open")]
    NotConnected,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Transport,
    Payload,
    Auth,
    Validation,
}

impl From<ApiError> for ClientError {
    fn from(value: ApiError) -> Self {
        if value.is_auth_failure() {
            ClientError::Unauthorized {
                status: value.status,
                message: value.message,
            }
        } else {
            ClientError::Http {
                status: value.status,
                message: value.message,
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            return ClientError::Payload(value.to_string());
        }
        match value.status() {
            Some(status) => ApiError::new(status.as_u16(), value.to_string()).into(),
            None => ClientError::Network(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Payload(value.to_string())
    }
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Unauthorized { .. } => ErrorCategory::Auth,
            ClientError::Http { status, .. } if *status >= 500 || *status == 429 => {
                ErrorCategory::Transient
            }
            ClientError::Http { .. } => ErrorCategory::Validation,
            ClientError::Network(_) => ErrorCategory::Transient,
            ClientError::Payload(_) => ErrorCategory::Payload,
            ClientError::Transport(_) | ClientError::NotConnected => ErrorCategory::Transport,
            ClientError::Validation(_)
            | ClientError::NoActiveConversation
            | ClientError::UnknownMessage(_) => ErrorCategory::Validation,
        }
    }

    /// Whether repeating an idempotent request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Transport
        )
    }

    pub fn requires_reauth(&self) -> bool {
        self.category() == ErrorCategory::Auth
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    /// Transient message, dismissed by the UI.
    Toast,
    /// Inline retry control attached to a failed optimistic message.
    InlineRetry { message_id: MessageId },
    /// Persistent banner; the user has to refresh.
    Banner,
    /// Session is no longer authenticated; the host app owns the login flow.
    Reauthenticate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub kind: NoticeKind,
    pub text: String,
}

pub const RECONNECTING_WARNING: &str = "Chat connection lost. Trying to reconnect…";
pub const TERMINAL_WARNING: &str = "Unable to reconnect to chat. Please refresh the page.";

impl UserNotice {
    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Toast,
            text: text.into(),
        }
    }

    pub fn banner(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Banner,
            text: text.into(),
        }
    }

    /// Notice for a failed send of the optimistic message `message_id`.
    pub fn for_send_failure(message_id: MessageId, err: &ClientError) -> Self {
        if err.requires_reauth() {
            return Self::for_auth_failure(err);
        }
        Self {
            kind: NoticeKind::InlineRetry { message_id },
            text: format!("Message not sent: {err}"),
        }
    }

    pub fn for_auth_failure(err: &ClientError) -> Self {
        Self {
            kind: NoticeKind::Reauthenticate,
            text: format!("Your session has expired ({err}). Please sign in again."),
        }
    }

    /// Notice for any other failed request.
    pub fn for_request_failure(context: &str, err: &ClientError) -> Self {
        if err.requires_reauth() {
            Self::for_auth_failure(err)
        } else {
            Self::toast(format!("{context}: {err}"))
        }
    }
}
