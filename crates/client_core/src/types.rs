use shared::domain::{ChatId, Message, MessageId, Participant, Role, UserId};

use crate::{error::UserNotice, presence::PresenceView};

/// Who the client speaks for on the socket and in optimistic messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: Role,
}

/// Updates published to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    HistoryLoaded {
        chat_id: ChatId,
        messages: Vec<Message>,
    },
    MessageAdded(Message),
    /// An optimistic entry took its permanent id.
    MessageReplaced {
        previous_id: MessageId,
        message: Message,
    },
    MessageUpdated(Message),
    MessageRemoved(MessageId),
    SendFailed {
        temp_id: MessageId,
        error: String,
    },
    /// `None` clears the indicator.
    TypingChanged(Option<Participant>),
    PresenceChanged(PresenceView),
    Notice(UserNotice),
}
