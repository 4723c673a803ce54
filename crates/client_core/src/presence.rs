use shared::protocol::PresenceAction;

use crate::{
    connection::{ConnectionState, ConnectionStatus},
    error::{RECONNECTING_WARNING, TERMINAL_WARNING},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceView {
    pub status: PresenceStatus,
    pub warning: Option<String>,
    /// Last join/leave seen for the other participant.
    pub remote_online: Option<bool>,
}

/// Projects connection state and remote join/leave into what the panel shows.
#[derive(Debug, Clone, Default)]
pub struct PresenceSurface {
    remote_online: Option<bool>,
}

impl PresenceSurface {
    pub fn apply_user_status(&mut self, action: PresenceAction) -> bool {
        let online = action == PresenceAction::Joined;
        let changed = self.remote_online != Some(online);
        self.remote_online = Some(online);
        changed
    }

    pub fn view(&self, connection: &ConnectionState) -> PresenceView {
        let (status, warning) = if connection.terminal {
            (PresenceStatus::Offline, Some(TERMINAL_WARNING))
        } else {
            match connection.status {
                ConnectionStatus::Open => (PresenceStatus::Online, None),
                _ if connection.attempt_count > 0 => {
                    (PresenceStatus::Reconnecting, Some(RECONNECTING_WARNING))
                }
                _ => (PresenceStatus::Offline, None),
            }
        };
        PresenceView {
            status,
            warning: warning.map(str::to_string),
            remote_online: self.remote_online,
        }
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
