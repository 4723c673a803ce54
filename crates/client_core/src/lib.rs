//! Client core for the live chat panel: connection management, message
//! reconciliation, typing and presence, plus the session that ties them to
//! the REST backend and the local cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod presence;
pub mod reconciler;
pub mod session;
pub mod timers;
pub mod transport;
pub mod typing;
pub mod types;

pub use api::{HttpLiveChatApi, LiveChatApi};
pub use cache::{ConversationCache, NoopCache};
pub use config::{load_settings, ClientSettings, SendVia};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{ClientError, NoticeKind, UserNotice};
pub use presence::{PresenceStatus, PresenceView};
pub use session::ChatClient;
pub use transport::{Connector, WsConnector};
pub use types::{ChatEvent, ChatIdentity};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
