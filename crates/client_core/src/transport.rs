//! Transport seam for the live chat socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[async_trait]
pub trait TransportLink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    /// Next inbound event; `None` once the stream ended without a close frame.
    async fn next_event(&mut self) -> Option<TransportEvent>;
    async fn close(&mut self, code: u16) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn TransportLink>>;
}

/// `Connector` backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn TransportLink>> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", redact_token(url)))?;
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("websocket send failed")
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            return match self.stream.next().await? {
                Ok(Message::Text(text)) => Some(TransportEvent::Text(text)),
                Ok(Message::Close(frame)) => Some(match frame {
                    Some(frame) => TransportEvent::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.into_owned(),
                    },
                    None => TransportEvent::Closed {
                        code: NO_STATUS_RECEIVED,
                        reason: String::new(),
                    },
                }),
                Ok(_) => continue,
                Err(err) => Some(TransportEvent::Error(err.to_string())),
            };
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
            .await
            .context("websocket close failed")
    }
}

/// Socket url for a url that may carry an auth token, safe for logs.
pub fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    if url.query_pairs().any(|(key, _)| key == "token") {
        let pairs = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key == "token" {
                    "***".to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect::<Vec<_>>();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
