//! Typing indicator state machine. It only computes signals and deadlines;
//! the session arms the timers.

use std::time::Duration;

use shared::domain::{Participant, UserId};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
struct RemoteIndicator {
    user: Participant,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct TypingController {
    self_id: UserId,
    debounce: Duration,
    expiry: Duration,
    announced: bool,
    stop_at: Option<Instant>,
    remote: Option<RemoteIndicator>,
}

impl TypingController {
    pub fn new(self_id: UserId, debounce: Duration, expiry: Duration) -> Self {
        Self {
            self_id,
            debounce,
            expiry,
            announced: false,
            stop_at: None,
            remote: None,
        }
    }

    /// Local input changed. Returns the frame to broadcast, if any.
    pub fn input_changed(&mut self, text: &str, now: Instant) -> Option<TypingSignal> {
        if text.trim().is_empty() {
            return self.reset_local();
        }
        self.stop_at = Some(now + self.debounce);
        if self.announced {
            None
        } else {
            self.announced = true;
            Some(TypingSignal::Start)
        }
    }

    /// Ends the current burst, e.g. after the message was sent.
    pub fn reset_local(&mut self) -> Option<TypingSignal> {
        self.stop_at = None;
        std::mem::take(&mut self.announced).then_some(TypingSignal::Stop)
    }

    pub fn poll_local(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.stop_at {
            Some(deadline) if deadline <= now => self.reset_local(),
            _ => None,
        }
    }

    pub fn local_deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    /// Applies a remote `typing_status`. Returns true when the visible
    /// indicator changed.
    pub fn remote_status(&mut self, user: Participant, is_typing: bool, now: Instant) -> bool {
        if user.id == self.self_id {
            return false;
        }
        if is_typing {
            let changed = self.remote.as_ref().map(|r| &r.user) != Some(&user);
            self.remote = Some(RemoteIndicator {
                user,
                expires_at: now + self.expiry,
            });
            return changed;
        }
        match &self.remote {
            Some(current) if current.user.id == user.id => {
                self.remote = None;
                true
            }
            _ => false,
        }
    }

    /// Clears an expired remote indicator. Returns true when it was cleared.
    pub fn poll_remote(&mut self, now: Instant) -> bool {
        match &self.remote {
            Some(current) if current.expires_at <= now => {
                self.remote = None;
                true
            }
            _ => false,
        }
    }

    pub fn remote_deadline(&self) -> Option<Instant> {
        self.remote.as_ref().map(|r| r.expires_at)
    }

    pub fn remote_typing(&self) -> Option<&Participant> {
        self.remote.as_ref().map(|r| &r.user)
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
