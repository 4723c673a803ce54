//! Connection Manager: one live socket per open conversation, fixed-delay
//! reconnect with a bounded attempt counter, and a heartbeat while open.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::ChatId,
    protocol::{chat_socket_path, ClientFrame, ServerFrame},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::{
    error::ClientError,
    transport::{
        redact_token, Connector, TransportEvent, TransportLink, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
    },
    types::ChatIdentity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failures since the last successful open.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Retry budget exhausted; only a manual refresh recovers.
    pub terminal: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            attempt_count: 0,
            last_error: None,
            terminal: false,
        }
    }
}

/// Floor for the heartbeat period; `interval_at` rejects a zero period.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Closed with the normal code; nothing to retry.
    Stopped,
    Retry { delay: Duration, attempt: u32 },
    Terminal,
}

/// Pure bookkeeping behind the reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    state: ConnectionState,
    // outcome already decided for the current attempt; an error followed by
    // the close of the same link must not count twice
    current_failure: Option<FailureOutcome>,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::default(),
            current_failure: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn begin_attempt(&mut self) {
        self.state.status = ConnectionStatus::Connecting;
        self.current_failure = None;
    }

    pub fn on_open(&mut self) {
        self.state.status = ConnectionStatus::Open;
        self.state.attempt_count = 0;
        self.state.last_error = None;
        self.state.terminal = false;
        self.current_failure = None;
    }

    pub fn on_close(&mut self, code: u16, reason: &str) -> FailureOutcome {
        if code == NORMAL_CLOSURE && self.current_failure.is_none() {
            self.state.status = ConnectionStatus::Closed;
            self.current_failure = Some(FailureOutcome::Stopped);
            return FailureOutcome::Stopped;
        }
        let detail = if reason.is_empty() {
            format!("connection closed with code {code}")
        } else {
            format!("connection closed with code {code}: {reason}")
        };
        self.record_failure(detail)
    }

    pub fn on_error(&mut self, error: impl Into<String>) -> FailureOutcome {
        self.record_failure(error.into())
    }

    pub fn on_shutdown(&mut self) {
        self.state.status = ConnectionStatus::Closed;
        self.current_failure = Some(FailureOutcome::Stopped);
    }

    fn record_failure(&mut self, detail: String) -> FailureOutcome {
        self.state.status = ConnectionStatus::Closed;
        if let Some(outcome) = self.current_failure {
            return outcome;
        }
        self.state.last_error = Some(detail);
        self.state.attempt_count += 1;
        let outcome = if self.state.attempt_count >= self.policy.max_attempts {
            self.state.terminal = true;
            FailureOutcome::Terminal
        } else {
            FailureOutcome::Retry {
                delay: self.policy.delay,
                attempt: self.state.attempt_count,
            }
        };
        self.current_failure = Some(outcome);
        outcome
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status(ConnectionState),
    Opened,
    Frame(ServerFrame),
    Closed { code: u16, reason: String },
    Error(String),
    /// Retry budget exhausted.
    Terminal,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Url,
    pub identity: ChatIdentity,
    pub heartbeat_interval: Duration,
    pub policy: ReconnectPolicy,
}

/// `{base}/ws/live-chat/{id}/`, with the auth token as a query parameter.
pub fn chat_endpoint(base: &Url, chat_id: ChatId, token: Option<&str>) -> Result<Url, ClientError> {
    let raw = format!(
        "{}{}",
        base.as_str().trim_end_matches('/'),
        chat_socket_path(chat_id)
    );
    let mut url = Url::parse(&raw).map_err(|err| ClientError::Transport(err.to_string()))?;
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Resolves once the worker has written the frame, or with the reason it
/// could not.
pub type WriteAck = oneshot::Receiver<Result<(), String>>;

enum Command {
    Send {
        frame: ClientFrame,
        ack: Option<oneshot::Sender<Result<(), String>>>,
    },
    Shutdown,
}

/// Owned handle to the connection task. Dropping it aborts the task;
/// `shutdown` closes the socket with the normal code first.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn spawn(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        let worker = ConnectionWorker {
            connector,
            tracker: ReconnectTracker::new(config.policy),
            config,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                commands: command_tx,
                state: state_rx,
                task: Some(task),
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().status == ConnectionStatus::Open
    }

    /// Queues a frame for the open socket.
    pub fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        self.queue(frame, None)
    }

    /// Like `send`, but the returned receiver reports whether the frame was
    /// actually written. Frames queued just before the link drops are
    /// answered with an error instead of vanishing.
    pub fn send_acked(&self, frame: ClientFrame) -> Result<WriteAck, ClientError> {
        let (ack, written) = oneshot::channel();
        self.queue(frame, Some(ack))?;
        Ok(written)
    }

    fn queue(
        &self,
        frame: ClientFrame,
        ack: Option<oneshot::Sender<Result<(), String>>>,
    ) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.commands
            .send(Command::Send { frame, ack })
            .map_err(|_| ClientError::NotConnected)
    }

    /// Cancels any pending reconnect, stops the heartbeat and closes the
    /// socket with the normal code.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum LinkEnd {
    Shutdown,
    Closed { code: u16, reason: String },
    Failed(String),
}

struct ConnectionWorker {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    tracker: ReconnectTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        loop {
            self.tracker.begin_attempt();
            self.publish();
            debug!(
                url = %redact_token(&self.config.endpoint),
                attempt = self.tracker.state().attempt_count,
                "chat: connecting"
            );

            let connector = Arc::clone(&self.connector);
            let endpoint = self.config.endpoint.clone();
            let connect = async move { connector.connect(&endpoint).await };
            tokio::pin!(connect);

            let connected = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    command = self.commands.recv() => match command {
                        Some(Command::Send { frame, ack }) => drop_frame(&frame, ack),
                        Some(Command::Shutdown) | None => {
                            self.tracker.on_shutdown();
                            self.publish();
                            return;
                        }
                    },
                }
            };

            let outcome = match connected {
                Ok(link) => match self.drive(link).await {
                    LinkEnd::Shutdown => return,
                    LinkEnd::Closed { code, reason } => {
                        self.emit(ConnectionEvent::Closed {
                            code,
                            reason: reason.clone(),
                        });
                        self.tracker.on_close(code, &reason)
                    }
                    LinkEnd::Failed(err) => {
                        self.emit(ConnectionEvent::Error(err.clone()));
                        self.tracker.on_error(err)
                    }
                },
                Err(err) => {
                    let err = format!("{err:#}");
                    self.emit(ConnectionEvent::Error(err.clone()));
                    self.tracker.on_error(err)
                }
            };
            self.publish();

            match outcome {
                FailureOutcome::Stopped => {
                    info!("chat: connection closed normally");
                    self.idle_until_shutdown().await;
                    return;
                }
                FailureOutcome::Retry { delay, attempt } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = self.tracker.state().last_error.as_deref().unwrap_or_default(),
                        "chat: connection lost, scheduling reconnect"
                    );
                    if !self.wait_for_retry(delay).await {
                        return;
                    }
                }
                FailureOutcome::Terminal => {
                    error!(
                        attempts = self.tracker.state().attempt_count,
                        "chat: unable to reconnect, giving up"
                    );
                    self.emit(ConnectionEvent::Terminal);
                    self.idle_until_shutdown().await;
                    return;
                }
            }
        }
    }

    async fn drive(&mut self, mut link: Box<dyn TransportLink>) -> LinkEnd {
        self.tracker.on_open();
        self.publish();
        self.emit(ConnectionEvent::Opened);
        info!("chat: connection open");

        let join = ClientFrame::UserJoin {
            user_id: self.config.identity.user_id,
            user_role: self.config.identity.user_role.clone(),
        };
        if let Err(err) = write_frame(link.as_mut(), &join).await {
            return LinkEnd::Failed(err);
        }

        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send { frame, ack }) => {
                        let written = write_frame(link.as_mut(), &frame).await;
                        if let Some(ack) = ack {
                            let _ = ack.send(written.clone());
                        }
                        if let Err(err) = written {
                            return LinkEnd::Failed(err);
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        if let Err(err) = link.close(NORMAL_CLOSURE).await {
                            debug!("chat: close during shutdown failed: {err:#}");
                        }
                        self.tracker.on_shutdown();
                        self.publish();
                        return LinkEnd::Shutdown;
                    }
                },
                _ = heartbeat.tick() => {
                    trace!("chat: heartbeat ping");
                    if let Err(err) = write_frame(link.as_mut(), &ClientFrame::Ping).await {
                        return LinkEnd::Failed(err);
                    }
                }
                event = link.next_event() => match event {
                    Some(TransportEvent::Text(text)) => self.handle_text(&text),
                    Some(TransportEvent::Closed { code, reason }) => {
                        return LinkEnd::Closed { code, reason };
                    }
                    Some(TransportEvent::Error(err)) => return LinkEnd::Failed(err),
                    None => {
                        return LinkEnd::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended without close frame".to_string(),
                        };
                    }
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Pong) => trace!("chat: heartbeat pong"),
            Ok(ServerFrame::Unknown) => debug!("chat: ignoring unknown frame: {text}"),
            Ok(frame) => self.emit(ConnectionEvent::Frame(frame)),
            Err(err) => warn!("chat: dropping malformed frame: {err}"),
        }
    }

    async fn wait_for_retry(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send { frame, ack }) => drop_frame(&frame, ack),
                    Some(Command::Shutdown) | None => {
                        self.tracker.on_shutdown();
                        self.publish();
                        return false;
                    }
                },
            }
        }
    }

    async fn idle_until_shutdown(&mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Send { frame, ack } => drop_frame(&frame, ack),
                Command::Shutdown => break,
            }
        }
    }

    fn publish(&self) {
        let state = self.tracker.state().clone();
        self.state.send_replace(state.clone());
        self.emit(ConnectionEvent::Status(state));
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

async fn write_frame(link: &mut dyn TransportLink, frame: &ClientFrame) -> Result<(), String> {
    let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
    link.send_text(text).await.map_err(|err| format!("{err:#}"))
}

fn drop_frame(frame: &ClientFrame, ack: Option<oneshot::Sender<Result<(), String>>>) {
    debug!(?frame, "chat: dropping frame while disconnected");
    if let Some(ack) = ack {
        let _ = ack.send(Err("chat connection is not open".to_string()));
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
