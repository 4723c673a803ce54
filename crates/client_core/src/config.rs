use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use shared::domain::{Role, UserId};
use url::Url;

use crate::types::ChatIdentity;

pub const DEFAULT_SETTINGS_FILE: &str = "chat_client.toml";

/// How outgoing messages reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendVia {
    #[default]
    Rest,
    /// `send_message` frame while the socket is open, REST otherwise.
    Socket,
}

impl SendVia {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" => Some(SendVia::Rest),
            "socket" | "ws" | "websocket" => Some(SendVia::Socket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTimings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub typing_debounce: Duration,
    pub typing_expiry: Duration,
    pub dedup_window: Duration,
    pub history_retry_attempts: u32,
    pub history_retry_delay: Duration,
    /// How long a socket send waits for its `message_sent` echo before it is
    /// offered for retry.
    pub send_echo_timeout: Duration,
}

impl Default for ChatTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            typing_debounce: Duration::from_millis(1000),
            typing_expiry: Duration::from_secs(5),
            dedup_window: Duration::from_secs(5),
            history_retry_attempts: 3,
            history_retry_delay: Duration::from_millis(500),
            send_echo_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: i64,
    pub user_name: String,
    pub user_role: String,
    pub cache_database_url: Option<String>,
    pub send_via: SendVia,
    pub timings: ChatTimings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000/api".into(),
            ws_url: None,
            auth_token: None,
            user_id: 0,
            user_name: "guest".into(),
            user_role: "student".into(),
            cache_database_url: Some("sqlite://./data/chat_cache.db".into()),
            send_via: SendVia::Rest,
            timings: ChatTimings::default(),
        }
    }
}

impl ClientSettings {
    pub fn identity(&self) -> ChatIdentity {
        ChatIdentity {
            user_id: UserId(self.user_id),
            user_name: self.user_name.clone(),
            user_role: Role::from(self.user_role.clone()),
        }
    }

    pub fn rest_base(&self) -> Result<Url> {
        let raw = self.server_url.trim().trim_end_matches('/');
        Url::parse(raw).with_context(|| format!("invalid server_url '{raw}'"))
    }

    /// WebSocket base: the explicit `ws_url`, or the REST origin with the
    /// scheme swapped (`http→ws`, `https→wss`) and the path dropped.
    pub fn socket_base(&self) -> Result<Url> {
        if let Some(raw) = self.ws_url.as_deref().filter(|v| !v.trim().is_empty()) {
            let raw = raw.trim().trim_end_matches('/');
            return Url::parse(raw).with_context(|| format!("invalid ws_url '{raw}'"));
        }

        let rest = self.rest_base()?;
        let scheme = match rest.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(anyhow!("server_url must be http(s), got '{other}'")),
        };
        let host = rest
            .host_str()
            .ok_or_else(|| anyhow!("server_url has no host"))?;
        let origin = match rest.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };
        Url::parse(&origin).with_context(|| format!("invalid derived websocket url '{origin}'"))
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Applies a flat `key = "value"` TOML file. Numbers may be written bare.
pub fn apply_file(settings: &mut ClientSettings, raw: &str) -> Result<()> {
    let table: HashMap<String, toml::Value> = toml::from_str(raw)?;
    let values = table
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect::<HashMap<_, _>>();

    for (key, value) in &values {
        apply_value(settings, key, value);
    }
    Ok(())
}

/// Environment overrides. Both `CHAT_*` and `APP__*` spellings are read,
/// the latter winning.
pub fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    const KEYS: &[&str] = &[
        "server_url",
        "ws_url",
        "auth_token",
        "user_id",
        "user_name",
        "user_role",
        "cache_database_url",
        "send_via",
        "heartbeat_interval_secs",
        "reconnect_delay_secs",
        "max_reconnect_attempts",
        "typing_debounce_ms",
        "typing_expiry_secs",
        "dedup_window_secs",
        "send_echo_timeout_secs",
    ];

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = lookup(&format!("CHAT_{upper}")) {
            apply_value(settings, key, &v);
        }
        if let Some(v) = lookup(&format!("APP__{upper}")) {
            apply_value(settings, key, &v);
        }
    }
}

fn apply_value(settings: &mut ClientSettings, key: &str, value: &str) {
    let value = value.trim();
    let secs = || value.parse::<u64>().ok().map(Duration::from_secs);
    // intervals the connection task ticks on must be non-zero
    let positive_secs = || match value.parse::<u64>() {
        Ok(0) => {
            tracing::warn!("config: '{key}' must be at least 1 second, keeping previous value");
            None
        }
        Ok(v) => Some(Duration::from_secs(v)),
        Err(_) => None,
    };
    match key {
        "server_url" => settings.server_url = value.to_string(),
        "ws_url" => settings.ws_url = Some(value.to_string()).filter(|v| !v.is_empty()),
        "auth_token" => settings.auth_token = Some(value.to_string()).filter(|v| !v.is_empty()),
        "user_id" => {
            if let Ok(parsed) = value.parse() {
                settings.user_id = parsed;
            }
        }
        "user_name" => settings.user_name = value.to_string(),
        "user_role" => settings.user_role = value.to_string(),
        "cache_database_url" => {
            settings.cache_database_url = match value {
                "" | "off" | "none" => None,
                other => Some(other.to_string()),
            }
        }
        "send_via" => {
            if let Some(parsed) = SendVia::parse(value) {
                settings.send_via = parsed;
            }
        }
        "heartbeat_interval_secs" => {
            if let Some(d) = positive_secs() {
                settings.timings.heartbeat_interval = d;
            }
        }
        "reconnect_delay_secs" => {
            if let Some(d) = positive_secs() {
                settings.timings.reconnect_delay = d;
            }
        }
        "max_reconnect_attempts" => {
            if let Ok(parsed) = value.parse() {
                settings.timings.max_reconnect_attempts = parsed;
            }
        }
        "typing_debounce_ms" => {
            if let Ok(parsed) = value.parse() {
                settings.timings.typing_debounce = Duration::from_millis(parsed);
            }
        }
        "typing_expiry_secs" => {
            if let Some(d) = secs() {
                settings.timings.typing_expiry = d;
            }
        }
        "dedup_window_secs" => {
            if let Some(d) = secs() {
                settings.timings.dedup_window = d;
            }
        }
        "send_echo_timeout_secs" => {
            if let Some(d) = positive_secs() {
                settings.timings.send_echo_timeout = d;
            }
        }
        other => tracing::debug!("config: ignoring unknown key '{other}'"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
