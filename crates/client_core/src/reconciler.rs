//! Message Reconciler: merges history, optimistic sends and live pushes into
//! one ordered list with exactly one entry per logical message.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Message, MessageId, MessageKind, MessageStatus, UserId},
    protocol::WireMessage,
};
use tracing::debug;

use crate::types::ChatIdentity;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The permanent id is already in the list.
    Duplicate,
    /// An optimistic entry was replaced in place by the server copy.
    Replaced {
        previous_id: MessageId,
        message: Message,
    },
    /// Same content and sender inside the dedup window; dropped.
    SuppressedNearDuplicate,
    Appended(Message),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Replaced {
        previous_id: MessageId,
        message: Message,
    },
    /// The live echo got there first; the optimistic entry was dropped.
    Removed { temp_id: MessageId },
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Applied(Message),
    /// Target not in the list yet; applied once it arrives.
    Queued,
}

#[derive(Debug)]
pub struct MessageReconciler {
    messages: Vec<Message>,
    next_temp: u64,
    dedup_window: chrono::Duration,
    pending_edits: HashMap<MessageId, String>,
    failed_sends: HashSet<MessageId>,
}

impl MessageReconciler {
    pub fn new(dedup_window: std::time::Duration) -> Self {
        Self {
            messages: Vec::new(),
            next_temp: 0,
            dedup_window: chrono::Duration::from_std(dedup_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            pending_edits: HashMap::new(),
            failed_sends: HashSet::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Adds a locally authored message with a fresh `temp-N` id.
    pub fn append_optimistic(
        &mut self,
        content: &str,
        author: &ChatIdentity,
        reply_to: Option<MessageId>,
        now: DateTime<Utc>,
    ) -> Message {
        self.next_temp += 1;
        let message = Message {
            id: MessageId::temporary(self.next_temp),
            sender_id: author.user_id,
            sender_name: author.user_name.clone(),
            sender_role: author.user_role.clone(),
            content: content.to_string(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            timestamp: now,
            status: MessageStatus::Sending,
            is_edited: false,
            reply_to,
        };
        self.messages.push(message.clone());
        message
    }

    /// Applies a server-pushed message.
    pub fn reconcile_incoming(&mut self, wire: WireMessage, now: DateTime<Utc>) -> ReconcileOutcome {
        if !wire.has_valid_timestamp() {
            debug!(id = %wire.id, "reconciler: unusable timestamp, using local time");
        }
        let mut incoming = wire.into_message(MessageStatus::Delivered, now);

        if self.position(&incoming.id).is_some() {
            return ReconcileOutcome::Duplicate;
        }

        let optimistic = self.messages.iter().position(|m| {
            m.is_optimistic()
                && m.sender_id == incoming.sender_id
                && m.content == incoming.content
        });
        if let Some(index) = optimistic {
            self.apply_pending_edit(&mut incoming);
            let previous = std::mem::replace(&mut self.messages[index], incoming.clone());
            self.failed_sends.remove(&previous.id);
            return ReconcileOutcome::Replaced {
                previous_id: previous.id,
                message: incoming,
            };
        }

        let window = self.dedup_window;
        let near_duplicate = self.messages.iter().any(|m| {
            m.sender_id == incoming.sender_id
                && m.content == incoming.content
                && (m.timestamp - incoming.timestamp).abs() <= window
        });
        if near_duplicate {
            debug!(id = %incoming.id, "reconciler: suppressing near-duplicate");
            return ReconcileOutcome::SuppressedNearDuplicate;
        }

        self.apply_pending_edit(&mut incoming);
        self.insert_sorted(incoming.clone());
        ReconcileOutcome::Appended(incoming)
    }

    /// Applies the REST acknowledgement for an optimistic send.
    pub fn confirm_send(
        &mut self,
        temp_id: &MessageId,
        wire: WireMessage,
        now: DateTime<Utc>,
    ) -> ConfirmOutcome {
        let mut confirmed = wire.into_message(MessageStatus::Sent, now);
        self.failed_sends.remove(temp_id);

        if self.position(&confirmed.id).is_some() {
            return match self.position(temp_id) {
                Some(index) => {
                    self.messages.remove(index);
                    ConfirmOutcome::Removed {
                        temp_id: temp_id.clone(),
                    }
                }
                None => ConfirmOutcome::Unknown,
            };
        }

        let Some(index) = self.position(temp_id) else {
            return ConfirmOutcome::Unknown;
        };
        let slot = &mut self.messages[index];
        confirmed.status = confirmed.status.max(slot.status);
        if let Some(content) = self.pending_edits.remove(&confirmed.id) {
            confirmed.content = content;
            confirmed.is_edited = true;
        }
        let previous = std::mem::replace(slot, confirmed.clone());
        ConfirmOutcome::Replaced {
            previous_id: previous.id,
            message: confirmed,
        }
    }

    pub fn mark_edited(&mut self, id: &MessageId, content: String) -> EditOutcome {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.content = content;
                message.is_edited = true;
                EditOutcome::Applied(message.clone())
            }
            None => {
                debug!(%id, "reconciler: queueing edit for unseen message");
                self.pending_edits.insert(id.clone(), content);
                EditOutcome::Queued
            }
        }
    }

    /// Flags an optimistic message as failed; it stays in `sending`.
    pub fn mark_send_failed(&mut self, temp_id: &MessageId) -> bool {
        let known = self
            .get(temp_id)
            .is_some_and(|m| m.is_optimistic() && m.status == MessageStatus::Sending);
        if known {
            self.failed_sends.insert(temp_id.clone());
        }
        known
    }

    pub fn is_send_failed(&self, temp_id: &MessageId) -> bool {
        self.failed_sends.contains(temp_id)
    }

    /// Clears the failure flag and hands back what to resend.
    pub fn take_retry(&mut self, temp_id: &MessageId) -> Option<(String, Option<MessageId>)> {
        if !self.failed_sends.remove(temp_id) {
            return None;
        }
        self.get(temp_id)
            .map(|m| (m.content.clone(), m.reply_to.clone()))
    }

    /// Replaces the list with drained history, keeping optimistic entries
    /// that are still waiting for confirmation.
    pub fn load_history(&mut self, history: Vec<WireMessage>, now: DateTime<Utc>) {
        let pending = self
            .messages
            .drain(..)
            .filter(Message::is_optimistic)
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut loaded = history
            .into_iter()
            .map(|wire| wire.into_message(MessageStatus::Delivered, now))
            .filter(|m| seen.insert(m.id.clone()))
            .collect::<Vec<_>>();
        loaded.sort_by_key(|m| m.timestamp);

        for mut message in loaded {
            self.apply_pending_edit(&mut message);
            self.messages.push(message);
        }
        for message in pending {
            self.insert_sorted(message);
        }
    }

    /// Marks everything authored by someone else as read. Returns the ids
    /// whose status changed.
    pub fn mark_all_read(&mut self, self_id: UserId) -> Vec<MessageId> {
        self.messages
            .iter_mut()
            .filter(|m| m.sender_id != self_id && m.status < MessageStatus::Read)
            .map(|m| {
                m.status = MessageStatus::Read;
                m.id.clone()
            })
            .collect()
    }

    /// Restores a cached list as a fallback view before history loads.
    pub fn restore(&mut self, cached: Vec<Message>) {
        if self.messages.is_empty() {
            self.messages = cached.into_iter().filter(|m| !m.is_optimistic()).collect();
        }
    }

    fn apply_pending_edit(&mut self, message: &mut Message) {
        if let Some(content) = self.pending_edits.remove(&message.id) {
            message.content = content;
            message.is_edited = true;
        }
    }

    /// Inserts after every entry whose timestamp is not later than the new
    /// one, so ties keep arrival order.
    fn insert_sorted(&mut self, message: Message) {
        let index = self
            .messages
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map_or(0, |i| i + 1);
        self.messages.insert(index, message);
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
